//! Counter ping-pong between a registry and one peer on the same machine.
//!
//! Both sides bump the counter and send it back until it reaches `ROUNDS`,
//! then the peer leaves and the registry shuts down. Settings come from the
//! `REMOTE_LINK_*` environment variables.

use std::time::Duration;

use remote_link::utils::logging::init_logging;
use remote_link::{Event, Message, NetworkConfig, Peer, Registry, SerdeCodec};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const ROUNDS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    count: u32,
}

type Codec = SerdeCodec<Counter>;

#[tokio::main]
async fn main() -> remote_link::Result<()> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let registry = Registry::with_config(Codec::new(config.transport.serialization_format), &config);
    let (_id, mut server_events) = registry.events().subscribe_channel()?;
    let addr = registry.start().await?;

    let server = registry.clone();
    let server_task = tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            match event {
                Event::ClientAdded(connection) => info!(peer = %connection.peer_addr(), "Client added"),
                Event::ClientRemoved { connection, .. } => {
                    info!(peer = %connection.peer_addr(), "Client removed");
                    break;
                }
                Event::MessageReceived {
                    connection,
                    message: Message::Object(mut counter),
                } => {
                    info!(count = counter.count, "Server received");
                    counter.count += 1;
                    server.notify_client_object(&connection, &counter).await;
                }
                _ => {}
            }
        }
    });

    let peer = Peer::with_config(Codec::new(config.transport.serialization_format), &config);
    let (_id, mut peer_events) = peer.events().subscribe_channel()?;
    let address = if config.client.address.is_empty() {
        addr.ip().to_string()
    } else {
        config.client.address.clone()
    };

    if !peer
        .wait_for(&address, addr.port(), Some(Duration::from_secs(60)))
        .await
    {
        error!("Server connection timed out");
        registry.dispose().await;
        return Ok(());
    }

    peer.send_object(&Counter { count: 1 }).await;
    while let Some(event) = peer_events.recv().await {
        match event {
            Event::MessageReceived {
                message: Message::Object(mut counter),
                ..
            } => {
                info!(count = counter.count, "Peer received");
                if counter.count >= ROUNDS {
                    break;
                }
                counter.count += 1;
                peer.send_object(&counter).await;
            }
            Event::Disconnected { reason, .. } => {
                info!(reason = ?reason, "Peer disconnected");
                break;
            }
            _ => {}
        }
    }

    peer.close().await;
    if let Err(e) = server_task.await {
        error!(error = %e, "Server event loop failed");
    }
    registry.dispose().await;
    Ok(())
}
