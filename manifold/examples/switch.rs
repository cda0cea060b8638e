//! A two-sided switch: everything received on one side is forwarded out the
//! other, and replies find their way back on their own thanks to the source
//! path each message carries.
//!
//! Usage:
//!   switch "tcp://127.0.0.1:7878#listen" "tcp://127.0.0.1:7879#listen"

use manifold::Socket;
use tracing::{error, info};

#[compio::main]
async fn main() -> manifold::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: switch <BACK-URL#dial|listen> <FRONT-URL#dial|listen>");
        std::process::exit(1);
    }

    let back = Socket::new();
    back.connect(&args[1]).await?;
    let front = Socket::new();
    front.connect(&args[2]).await?;
    info!(back = %args[1], front = %args[2], "switch up");

    let back_to_front = {
        let (from, to) = (back.receiver().clone(), front.sender().clone());
        compio::runtime::spawn(async move { forward(from, to).await })
    };
    let (from, to) = (front.receiver().clone(), back.sender().clone());
    forward(from, to).await;
    back_to_front.await;
    Ok(())
}

async fn forward(from: manifold::Receiver, to: manifold::Sender) {
    loop {
        let msg = match from.recv_msg().await {
            Ok(msg) => msg,
            Err(err) => {
                error!(%err, "recv");
                return;
            }
        };
        if let Err(err) = to.send_msg(msg).await {
            error!(%err, "forward");
        }
    }
}
