//! Echo server and client over one address.
//!
//! Usage:
//!   echo listen tcp://127.0.0.1:7878
//!   echo dial tcp://127.0.0.1:7878 alice

use manifold::Socket;
use std::time::Duration;
use tracing::info;

#[compio::main]
async fn main() -> manifold::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("listen") if args.len() > 2 => server(&args[2]).await,
        Some("dial") if args.len() > 3 => client(&args[2], &args[3]).await,
        _ => {
            eprintln!("Usage: echo listen|dial <URL> [NAME]");
            std::process::exit(1);
        }
    }
}

async fn server(addr: &str) -> manifold::Result<()> {
    let socket = Socket::new();
    socket.listen(addr).await?;
    info!(addr, "echo server up");

    loop {
        let msg = socket.recv_msg().await?;
        info!(
            pipe = msg.pipe_id().unwrap_or(0),
            len = msg.content().len(),
            "request"
        );
        let reply: Vec<u8> = msg.content().to_ascii_uppercase();
        socket.send_to(msg.source().clone(), reply).await?;
    }
}

async fn client(addr: &str, name: &str) -> manifold::Result<()> {
    let socket = Socket::new();
    socket.dial(addr).await?;
    info!(addr, "connected");

    for idx in 0.. {
        let request = format!("{name}#{idx}");
        socket.send(request.into_bytes()).await?;
        let reply = socket.recv().await?;
        println!("{}", String::from_utf8_lossy(&reply));
        compio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}
