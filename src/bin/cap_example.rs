use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;

use cap::{CapSocket, Error};

const DEFAULT_SERVER: &str = "127.0.0.1:9090";

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let outcome = match args.get(1).map(String::as_str) {
        Some("server") => server(parse_addr(args.get(2), DEFAULT_SERVER)),
        Some("client") => client(
            parse_addr(args.get(3), "127.0.0.1:0"),
            parse_addr(args.get(2), DEFAULT_SERVER),
        ),
        _ => {
            eprintln!("usage: cap-example server [bind-addr]");
            eprintln!("       cap-example client [server-addr] [bind-addr]");
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cap-example: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_addr(arg: Option<&String>, default: &str) -> SocketAddr {
    arg.map(String::as_str).unwrap_or(default).parse().unwrap()
}

fn server(bind: SocketAddr) -> Result<(), Error> {
    let socket = CapSocket::bind(bind)?;
    socket.listen()?;

    println!(">>> Waiting for incoming connections on {bind}...");
    let stream = socket.accept()?;
    println!(">>> Connection accepted from {}", stream.peer_addr());

    loop {
        let mut buf = [0u8; 64 * 1024];

        match stream.recv(&mut buf) {
            Ok(n) => println!(">>> Message: {:?}", String::from_utf8_lossy(&buf[..n])),
            Err(Error::ConnectionClosed) => break,
            Err(e) => return Err(e),
        }
    }

    println!(">>> Peer closed the connection");
    Ok(())
}

fn client(bind: SocketAddr, server: SocketAddr) -> Result<(), Error> {
    let socket = CapSocket::bind(bind)?;

    println!(">>> Trying to connect to {server}...");
    let mut stream = socket.connect(server)?;
    println!(">>> Connected!");

    stream.sendto(b"Hello over the Cumulative ACK Protocol!")?;
    stream.sendto(b"And goodbye.")?;
    stream.close()?;

    Ok(())
}
