//! Demo server: creates one multicast group, announces it to every client that connects over
//! a plain TCP line protocol (standing in for the reliable unicast session layer), and fans
//! out every stdin line to the group.
//!
//! ```text
//! group_server <listen-addr> [<multicast-addr> <multicast-port>] [reliable=0|1]
//! group_server 0.0.0.0:12345 239.255.0.1 30001 1
//! ```

use anyhow::Context;
use async_trait::async_trait;
use groupcast::{GroupManager, GroupMode, MulticastConfig, UnicastSession};
use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, Level};

/// one announcement per line, newline-terminated
struct TcpLineSession {
    write_half: Mutex<OwnedWriteHalf>,
}

#[async_trait]
impl UnicastSession for TcpLineSession {
    async fn send(&self, msg: &[u8]) -> anyhow::Result<()> {
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(msg).await?;
        write_half.write_all(b"\n").await?;
        Ok(())
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let listen_addr = args.next()
        .context("usage: group_server <listen-addr> [<multicast-addr> <multicast-port>] [reliable=0|1]")?;
    let explicit = match (args.next(), args.next()) {
        (Some(addr), Some(port)) => Some(SocketAddrV4::new(addr.parse()?, port.parse()?)),
        _ => None,
    };
    let mode = if args.next().as_deref() == Some("1") { GroupMode::Reliable } else { GroupMode::BestEffort };

    // loopback enabled so a client on the same machine sees the traffic
    let manager = Arc::new(GroupManager::new(MulticastConfig {
        loopback: true,
        ..MulticastConfig::default()
    })?);
    let group_id = manager.create_group(explicit).await?;
    let info = manager.get_group_info(group_id).await.expect("group was just created");
    println!("created multicast group:\n{}", info);

    let listener = TcpListener::bind(&listen_addr).await
        .with_context(|| format!("binding {}", listen_addr))?;
    info!("announcing group {} to clients on {}", group_id, listen_addr);

    {
        let manager = manager.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else { return };
                info!("client connected: {}", peer);

                let (_, write_half) = stream.into_split();
                let session = TcpLineSession { write_half: Mutex::new(write_half) };
                if let Err(e) = manager.announce_group(&session, group_id, mode).await {
                    info!("failed to announce group to {}: {}", peer, e);
                }
                // the session stands in for a long-lived unicast connection; keeping the
                //  write half alive until here is all this demo needs
            }
        });
    }

    println!("type a line to fan it out ({:?} mode), ctrl-d to stop", mode);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match mode {
            GroupMode::Reliable => manager.send_reliable_to_group(group_id, line.as_bytes()).await,
            GroupMode::BestEffort => manager.send_to_group(group_id, line.as_bytes()).await,
        }
        if let Some(info) = manager.get_group_info(group_id).await {
            println!("sent {} bytes, {} pending", line.len(), info.pending_count);
        }
    }

    manager.stop().await;
    Ok(())
}
