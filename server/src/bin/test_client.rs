use clap::Parser;
use shared::{Packet, PacketChannel, PacketKind, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const MAX_PACKET: usize = 10 * 1024 * 1024;
const REPLY_TIMEOUT: Duration = Duration::from_secs(35);

/// Opens raw protocol connections to a running server and reports how each fared
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:22222")]
    server: String,
    /// Simultaneous connections to open
    #[clap(short, long, default_value_t = 1)]
    connections: usize,
    /// Snapshots to read per connection before saying goodbye
    #[clap(short, long, default_value_t = 10)]
    frames: usize,
}

#[derive(Debug)]
enum ProbeResult {
    Completed { session_id: u64, frames: usize },
    Rejected,
    Failed(String),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    println!(
        "Probing {} with {} connection(s)",
        args.server, args.connections
    );

    let mut handles = Vec::new();
    for index in 0..args.connections {
        let server = args.server.clone();
        let frames = args.frames;
        handles.push(tokio::spawn(async move {
            (index, probe(&server, index, frames).await)
        }));
    }

    let mut completed = 0;
    let mut rejected = 0;
    for handle in handles {
        let (index, result) = handle.await?;
        println!("  connection {}: {:?}", index, result);
        match result {
            ProbeResult::Completed { .. } => completed += 1,
            ProbeResult::Rejected => rejected += 1,
            ProbeResult::Failed(_) => {}
        }
    }

    println!(
        "{} completed, {} rejected, {} failed",
        completed,
        rejected,
        args.connections - completed - rejected
    );
    Ok(())
}

async fn probe(server: &str, index: usize, frames: usize) -> ProbeResult {
    let stream = match TcpStream::connect(server).await {
        Ok(stream) => stream,
        Err(e) => return ProbeResult::Failed(e.to_string()),
    };
    let mut channel = PacketChannel::new(stream, MAX_PACKET);
    channel.start();

    let result = run_probe(&mut channel, index, frames).await;
    channel.stop().await;
    result
}

async fn run_probe(channel: &mut PacketChannel, index: usize, frames: usize) -> ProbeResult {
    if let Err(e) = channel.send_packet(Packet::ClientHello {
        client_version: PROTOCOL_VERSION,
    }) {
        return ProbeResult::Failed(e.to_string());
    }

    let session_id = match timeout(REPLY_TIMEOUT, channel.recv_packet()).await {
        Ok(Some(Packet::ServerAccept { session_id })) => session_id,
        // admission drops the connection before any reply
        Ok(None) => return ProbeResult::Rejected,
        Ok(Some(other)) => return ProbeResult::Failed(format!("got {:?}", other.kind())),
        Err(_) => return ProbeResult::Failed("no ServerAccept".to_string()),
    };

    if let Err(e) = channel.send_packet(Packet::ClientGameRequest {
        player_name: format!("probe-{}", index),
    }) {
        return ProbeResult::Failed(e.to_string());
    }

    let mut received = 0;
    while received < frames {
        match timeout(REPLY_TIMEOUT, channel.recv_packet()).await {
            Ok(Some(packet)) if packet.kind() == PacketKind::FrameSnapshot => received += 1,
            Ok(Some(_)) => {}
            Ok(None) => return ProbeResult::Failed("connection closed".to_string()),
            Err(_) => return ProbeResult::Failed("snapshot timeout".to_string()),
        }
    }

    if let Err(e) = channel.send_packet(Packet::ClientGoodbye) {
        return ProbeResult::Failed(e.to_string());
    }
    loop {
        match timeout(REPLY_TIMEOUT, channel.recv_packet()).await {
            Ok(Some(Packet::ServerGoodbye)) => break,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return ProbeResult::Failed("no ServerGoodbye".to_string()),
        }
    }

    ProbeResult::Completed {
        session_id,
        frames: received,
    }
}
