use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(about = "Edge-triggered Caesar-cipher transform server")]
struct Args {
    /// Port to listen on.
    #[arg(short = 'p', long)]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

fn main() -> cipher::CipherResult<()> {
    env_logger::init();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    cipher::reactor_loop::run_server(&args.host, args.port, shutdown)
}
