pub mod commands;
pub mod connection;
pub mod dispatch;

use std::{net::SocketAddr, sync::Arc};

use service::{Gateway, reflect::Reflection};
use tokio::net::TcpListener;

use crate::{config::Config, server::connection::Connection};

/// Binds the gateway listener and spawns the accept loop. Every
/// accepted socket gets its own connection task running the receive
/// loop until the peer disconnects or sends shutdown.
pub async fn start<R: Reflection + 'static>(
    config: &Arc<Config>,
    gateway: &Arc<Gateway<R>>,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(config.server.listen).await?;
    let local_addr = listener.local_addr()?;

    let config = config.clone();
    let gateway = gateway.clone();
    tokio::spawn(async move {
        // Accept all connections on the current listener, but exit the
        // loop when the listener itself fails.
        while let Ok((socket, address)) = listener.accept().await {
            log::info!("peer connection accepted: addr={address}, interface={local_addr}");

            // Disable the Nagle algorithm. Commands are short lines and
            // callbacks are latency bound, buffering them up helps nothing.
            if let Err(e) = socket.set_nodelay(true) {
                log::error!("socket set nodelay failed!: addr={address}, err={e}");
            }

            let connection = Connection::new(
                gateway.clone(),
                socket,
                address,
                config.auth.token.clone(),
                config.server.reply_timeout_duration(),
            );

            tokio::spawn(connection.serve());
        }
    });

    log::info!("bridge server listening: interface={local_addr}");
    Ok(local_addr)
}
