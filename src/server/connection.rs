//! The duplex connection.
//!
//! One socket serves both directions: the peer's inbound commands and
//! the host's outbound callback commands. The receive loop owns the
//! socket exclusively, so while a command is being handled the handler
//! can issue callbacks on the same socket without any further locking,
//! and only one logical operation is ever in flight on the wire.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use service::{BridgeError, Gateway, reflect::Reflection};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

use crate::server::dispatch::{self, ConnState, DispatchContext, Flow};

/// Buffered line reader and writer over one socket.
pub struct ConnectionIo {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ConnectionIo {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Reads one line without its terminator. `None` means the peer
    /// closed the socket cleanly.
    pub async fn read_line(&mut self) -> Result<Option<String>, BridgeError> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) => Ok(None),
            Ok(_) => {
                while line.ends_with(['\n', '\r']) {
                    line.pop();
                }

                Ok(Some(line))
            }
            Err(e) => Err(BridgeError::Network(format!("read failed: {}", e))),
        }
    }

    /// Like [`ConnectionIo::read_line`], bounded by `wait` when given.
    pub async fn read_line_timeout(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<String>, BridgeError> {
        match wait {
            None => self.read_line().await,
            Some(wait) => timeout(wait, self.read_line())
                .await
                .map_err(|_| BridgeError::Network("reply timed out".to_string()))?,
        }
    }

    pub async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>, BridgeError> {
        let mut data = vec![0; count];
        self.reader
            .read_exact(&mut data)
            .await
            .map_err(|e| BridgeError::Network(format!("read failed: {}", e)))?;

        Ok(data)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| BridgeError::Network(format!("write failed: {}", e)))
    }
}

/// Sends a command over an established connection and reads the reply.
///
/// The peer may issue its own nested requests on the same socket before
/// answering; every line that is not a return envelope is dispatched as
/// an inbound command to completion, in arrival order, before the reply
/// is expected. Lines are strictly FIFO per socket, so the first
/// envelope line after those requests is the reply. Non-blocking mode
/// bounds every read by the context's reply timeout.
pub async fn send_command_io<R: Reflection>(
    io: &mut ConnectionIo,
    ctx: &mut DispatchContext<'_, R>,
    command: &str,
    blocking: bool,
) -> Result<String, BridgeError> {
    io.write_all(command.as_bytes()).await?;

    let wait = (!blocking).then_some(ctx.reply_timeout);
    loop {
        let line = io
            .read_line_timeout(wait)
            .await?
            .ok_or_else(|| BridgeError::Network("connection closed".to_string()))?;

        if line.trim().is_empty() {
            return Err(BridgeError::Network("empty response".to_string()));
        }

        if line.starts_with(['y', '!']) {
            return Ok(line);
        }

        // A nested inbound command; its handler may send callbacks of
        // its own, hence the boxed recursion.
        match Box::pin(dispatch::handle_request(io, ctx, line)).await? {
            Flow::Continue => {}
            Flow::Shutdown => {
                return Err(BridgeError::Network(
                    "peer shut down while a reply was pending".to_string(),
                ));
            }
        }
    }
}

/// A connection accepted from the peer, served by its own task.
pub struct Connection<R: Reflection> {
    gateway: Arc<Gateway<R>>,
    io: ConnectionIo,
    address: SocketAddr,
    auth_token: Option<String>,
    reply_timeout: Duration,
}

impl<R: Reflection> Connection<R> {
    pub fn new(
        gateway: Arc<Gateway<R>>,
        stream: TcpStream,
        address: SocketAddr,
        auth_token: Option<String>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            io: ConnectionIo::new(stream),
            address,
            auth_token,
            reply_timeout,
        }
    }

    /// The receive loop. Runs until the peer disconnects, sends the
    /// shutdown command or an unrecoverable error occurs.
    pub async fn serve(mut self) {
        self.gateway.connection_started(self.address);

        let mut state = ConnState {
            authenticated: self.auth_token.is_none(),
            last_exception: None,
        };

        loop {
            let line = match self.io.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("connection read failed: addr={}, err={}", self.address, e);
                    break;
                }
            };

            // Stray blank lines between commands are tolerated.
            if line.trim().is_empty() {
                continue;
            }

            let mut ctx = DispatchContext {
                gateway: &self.gateway,
                state: &mut state,
                auth_token: self.auth_token.as_deref(),
                reply_timeout: self.reply_timeout,
            };

            match dispatch::handle_request(&mut self.io, &mut ctx, line).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => break,
                Err(e) => {
                    log::warn!("connection failed: addr={}, err={}", self.address, e);
                    break;
                }
            }
        }

        log::info!("peer connection stopped: addr={}", self.address);
        self.gateway.connection_stopped(self.address);
    }
}
