use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(about = "Half-duplex HTTP/1.0 forward proxy with blacklist-based request rewriting")]
struct Args {
    /// Port to listen on.
    port: u16,
}

/// Reads newline-delimited blacklist entries from stdin when stdin has been
/// redirected from a file, mirroring the original's "pipe a blacklist file
/// in, or run interactively with none" convention.
fn read_blacklist() -> Vec<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Vec::new();
    }
    stdin
        .lock()
        .lines()
        .map_while(Result::ok)
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn main() -> proxy::ProxyResult<()> {
    env_logger::init();
    let args = Args::parse();
    let black_urls = read_blacklist();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    proxy::reactor_loop::run_proxy(args.port, black_urls, shutdown)
}
