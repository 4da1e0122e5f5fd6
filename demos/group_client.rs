//! Demo client: connects to the demo server's TCP side channel, feeds every received line to
//! the announcement handler and prints what the multicast receiver delivers.
//!
//! ```text
//! group_client <server-addr>
//! group_client 127.0.0.1:12345
//! ```

use anyhow::Context;
use async_trait::async_trait;
use groupcast::{AnnouncementHandler, GroupId, MessageDispatcher};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::Level;

struct PrintingDispatcher;

#[async_trait]
impl MessageDispatcher for PrintingDispatcher {
    async fn on_message(&self, group_id: GroupId, payload: &[u8]) {
        println!("group {}: {}", group_id, String::from_utf8_lossy(payload));
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

    let server_addr = std::env::args().nth(1)
        .context("usage: group_client <server-addr>")?;

    let stream = TcpStream::connect(&server_addr).await
        .with_context(|| format!("connecting {}", server_addr))?;
    println!("connected to {}", server_addr);

    let handler = AnnouncementHandler::new(Arc::new(PrintingDispatcher));

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        handler.on_unicast_message(line.as_bytes()).await;
    }

    // the side channel closing does not end the multicast membership
    println!("side channel closed - still receiving, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    handler.stop().await;
    Ok(())
}
