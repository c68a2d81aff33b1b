//! The peer callback client.
//!
//! Host code that needs to call the peer outside of any inbound command
//! has no connection on its call stack, so it borrows one from this
//! pool toward the peer's callback server. Sockets are parked after a
//! successful round trip and reused most-recent-first; a parked socket
//! may have gone stale while idle, which is the one case that is
//! retried with a fresh connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use codec::command;
use parking_lot::Mutex;
use service::{BridgeError, Gateway, reflect::Reflection};
use tokio::net::TcpStream;

use crate::server::{
    connection::{ConnectionIo, send_command_io},
    dispatch::{ConnState, DispatchContext},
};

pub struct CallbackOptions {
    /// Address of the peer's callback server.
    pub endpoint: SocketAddr,
    /// Maximum number of idle sockets kept parked.
    pub pool_size: usize,
    /// Shared token presented on connect, when auth is enabled.
    pub auth_token: Option<String>,
    /// Reply wait bound for non-blocking sends.
    pub reply_timeout: Duration,
}

pub struct CallbackClient<R: Reflection> {
    gateway: Arc<Gateway<R>>,
    endpoint: SocketAddr,
    pool_size: usize,
    auth_token: Option<String>,
    reply_timeout: Duration,
    idle: Mutex<Vec<ConnectionIo>>,
}

impl<R: Reflection> CallbackClient<R> {
    pub fn new(gateway: Arc<Gateway<R>>, options: CallbackOptions) -> Self {
        Self {
            gateway,
            endpoint: options.endpoint,
            pool_size: options.pool_size,
            auth_token: options.auth_token,
            reply_timeout: options.reply_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Blocking round trip: waits for the reply however long it takes.
    pub async fn send_command(&self, command: &str) -> Result<String, BridgeError> {
        self.send_command_with(command, true).await
    }

    /// Sends a command and reads the reply, dispatching any nested
    /// inbound commands the peer issues first. A failure on a socket
    /// that was reused from the pool is retried once on a fresh one;
    /// failures on fresh sockets propagate.
    pub async fn send_command_with(
        &self,
        command: &str,
        blocking: bool,
    ) -> Result<String, BridgeError> {
        // The pool lock must not be held across the dial await.
        let pooled = self.idle.lock().pop();
        let (io, reused) = match pooled {
            Some(io) => (io, true),
            None => (self.dial().await?, false),
        };

        match self.round_trip(io, command, blocking).await {
            Ok((io, reply)) => {
                self.park(io);
                Ok(reply)
            }
            Err(e) if reused => {
                log::debug!(
                    "pooled connection failed, retrying on a fresh one: endpoint={}, err={}",
                    self.endpoint,
                    e
                );

                let io = self.dial().await?;
                let (io, reply) = self.round_trip(io, command, blocking).await?;
                self.park(io);
                Ok(reply)
            }
            Err(e) => Err(e),
        }
    }

    /// A client against a different peer endpoint, sharing auth and
    /// sizing but none of the parked sockets.
    pub fn copy_with(&self, endpoint: SocketAddr) -> Self {
        Self {
            gateway: self.gateway.clone(),
            endpoint,
            pool_size: self.pool_size,
            auth_token: self.auth_token.clone(),
            reply_timeout: self.reply_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Drops every parked socket. In-flight round trips are unaffected,
    /// their sockets are simply not parked again.
    pub fn shutdown(&self) {
        self.idle.lock().clear();
    }

    async fn round_trip(
        &self,
        mut io: ConnectionIo,
        command: &str,
        blocking: bool,
    ) -> Result<(ConnectionIo, String), BridgeError> {
        let mut state = ConnState {
            authenticated: true,
            last_exception: None,
        };

        let mut ctx = DispatchContext {
            gateway: &self.gateway,
            state: &mut state,
            auth_token: None,
            reply_timeout: self.reply_timeout,
        };

        let reply = send_command_io(&mut io, &mut ctx, command, blocking).await?;
        Ok((io, reply))
    }

    async fn dial(&self) -> Result<ConnectionIo, BridgeError> {
        let stream = TcpStream::connect(self.endpoint)
            .await
            .map_err(|e| BridgeError::Network(format!("connect failed: {}", e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            log::error!("socket set nodelay failed!: endpoint={}, err={e}", self.endpoint);
        }

        let mut io = ConnectionIo::new(stream);
        if let Some(token) = &self.auth_token {
            let preamble = format!(
                "{}\ns{}\n{}\n",
                command::AUTH,
                codec::escape(token),
                command::END
            );

            io.write_all(preamble.as_bytes()).await?;
            let reply = io
                .read_line()
                .await?
                .ok_or_else(|| BridgeError::Network("connection closed".to_string()))?;

            if reply != "yrv" {
                return Err(BridgeError::Network("authentication rejected".to_string()));
            }
        }

        Ok(io)
    }

    fn park(&self, io: ConnectionIo) {
        let mut idle = self.idle.lock();
        if idle.len() < self.pool_size {
            idle.push(io);
        }
    }
}
