use cipher::{Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use clap::Parser;
use std::io::{self, Read, Write};
use std::net::TcpStream;

#[derive(Parser, Debug)]
#[command(about = "Caesar-cipher transform client: chunks stdin, sends it through the server, prints the result")]
struct Args {
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short = 'p', long)]
    port: u16,

    /// 0 = encrypt, 1 = decrypt.
    #[arg(short = 'o', long)]
    op: u16,

    #[arg(short = 's', long)]
    shift: u16,
}

fn send_all(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = stream.write(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed mid-write"));
        }
        buf = &buf[n..];
    }
    Ok(())
}

fn recv_all(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-read"));
        }
        filled += n;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;
    let mut output = Vec::with_capacity(input.len());

    for chunk in input.chunks(MAX_PAYLOAD_SIZE as usize) {
        let header = Header {
            op: args.op,
            shift: args.shift,
            total_length: (HEADER_SIZE + chunk.len()) as u32,
        };
        send_all(&mut stream, &header.to_bytes())?;
        send_all(&mut stream, chunk)?;

        let mut reply_header_buf = [0u8; HEADER_SIZE];
        recv_all(&mut stream, &mut reply_header_buf)?;
        let reply_header = Header::parse(&reply_header_buf)?;

        let mut payload = vec![0u8; reply_header.payload_len()];
        recv_all(&mut stream, &mut payload)?;
        output.extend_from_slice(&payload);
    }

    io::stdout().write_all(&output)?;
    Ok(())
}
