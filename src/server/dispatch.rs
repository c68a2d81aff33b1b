//! The command dispatcher.
//!
//! Reads a command body off the connection, routes the group line
//! through the command table and writes exactly one response line (plus
//! raw bytes for stream reads). Unknown groups are logged and left
//! unanswered, matching the reference behavior; the `protocol-strict`
//! feature opts into replying with a protocol error instead.

use std::time::Duration;

use codec::{ErrorKind, ReturnValue, Token, command};
use service::{BridgeError, Gateway, reflect::Reflection};

use crate::server::{commands, connection::ConnectionIo};

pub enum Flow {
    Continue,
    Shutdown,
}

/// What a handler asks the dispatcher to write back.
pub enum Reply {
    Line(ReturnValue),
    /// A response line followed by raw bytes, used by stream reads.
    Raw(ReturnValue, Vec<u8>),
}

/// Per-connection dispatch state.
pub struct ConnState {
    pub authenticated: bool,
    /// Id of the last throwable bound on behalf of this connection,
    /// served by the exception command.
    pub last_exception: Option<String>,
}

/// Everything a handler may need besides the socket: the gateway and
/// the connection state. Carrying the connection through this context is
/// what routes nested callback sends to the peer side that is already
/// waiting on this socket.
pub struct DispatchContext<'a, R: Reflection> {
    pub gateway: &'a std::sync::Arc<Gateway<R>>,
    pub state: &'a mut ConnState,
    pub auth_token: Option<&'a str>,
    pub reply_timeout: Duration,
}

/// Argument lines of one command, consumed front to back.
pub struct Body {
    lines: Vec<String>,
    cursor: usize,
}

impl Body {
    pub fn next_line(&mut self) -> Result<String, BridgeError> {
        let line = self
            .lines
            .get(self.cursor)
            .cloned()
            .ok_or_else(|| BridgeError::Protocol("missing argument".to_string()))?;

        self.cursor += 1;
        Ok(line)
    }

    pub fn next_token(&mut self) -> Result<Token, BridgeError> {
        let line = self.next_line()?;
        Token::decode(&line).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    /// A non-negative int or long token, used for indices and lengths.
    pub fn next_index(&mut self) -> Result<usize, BridgeError> {
        let value = match self.next_token()? {
            Token::Int(value) => i64::from(value),
            Token::Long(value) => value,
            _ => return Err(BridgeError::Protocol("expected an integer".to_string())),
        };

        usize::try_from(value)
            .map_err(|_| BridgeError::Protocol(format!("index out of range: {}", value)))
    }

    pub fn rest_tokens(&mut self) -> Result<Vec<Token>, BridgeError> {
        let mut tokens = Vec::with_capacity(self.lines.len() - self.cursor);
        while self.cursor < self.lines.len() {
            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }
}

/// Reads argument lines up to and including the end-of-command line. A
/// socket that closes mid-body is a network failure, not a protocol
/// error, the command never completes.
async fn read_body(io: &mut ConnectionIo) -> Result<Body, BridgeError> {
    let mut lines = Vec::new();
    loop {
        let line = io
            .read_line()
            .await?
            .ok_or_else(|| BridgeError::Network("connection closed mid command".to_string()))?;

        if line == command::END {
            return Ok(Body { lines, cursor: 0 });
        }

        lines.push(line);
    }
}

/// Routes one command. The group line has already been read by the
/// caller; everything else, including the response, happens here.
pub async fn handle_request<R: Reflection>(
    io: &mut ConnectionIo,
    ctx: &mut DispatchContext<'_, R>,
    group: String,
) -> Result<Flow, BridgeError> {
    // Shutdown has no body and no reply.
    if group == command::SHUTDOWN {
        return Ok(Flow::Shutdown);
    }

    let mut body = read_body(io).await?;

    if let Some(token) = ctx.auth_token
        && !ctx.state.authenticated
    {
        let reply = if group == command::AUTH {
            commands::auth(ctx.state, token, &mut body)
        } else {
            ReturnValue::protocol_error("authentication required")
        };

        let flow = if ctx.state.authenticated {
            Flow::Continue
        } else {
            Flow::Shutdown
        };

        write_reply(io, ctx.state, Reply::Line(reply)).await?;
        return Ok(flow);
    }

    let reply = match group.as_str() {
        command::CORE => commands::core(io, ctx, &mut body).await,
        command::FIELD => commands::field(ctx.gateway, &mut body).map(Reply::Line),
        command::LIST => commands::list(ctx.gateway, &mut body).map(Reply::Line),
        command::ARRAY => commands::array(ctx.gateway, &mut body).map(Reply::Line),
        command::MAP => commands::map(ctx.gateway, &mut body).map(Reply::Line),
        command::SET => commands::set(ctx.gateway, &mut body).map(Reply::Line),
        command::MEMORY => commands::memory(ctx.gateway, &mut body).map(Reply::Line),
        command::VIEW => commands::view(ctx.gateway, &mut body).map(Reply::Line),
        command::REFLECTION => commands::reflection(ctx.gateway, &mut body).map(Reply::Line),
        command::HELP => commands::help(ctx.gateway, &mut body).map(Reply::Line),
        command::STREAM => commands::stream(io, ctx.gateway, &mut body).await,
        command::EXCEPTION => commands::exception(ctx.gateway, ctx.state, &mut body).map(Reply::Line),
        // Repeated auth on an authenticated connection is a no-op.
        command::AUTH => Ok(Reply::Line(ReturnValue::Void)),
        _ => {
            log::warn!("unknown command: command={group}");

            #[cfg(feature = "protocol-strict")]
            write_reply(
                io,
                ctx.state,
                Reply::Line(ReturnValue::protocol_error(format!(
                    "unknown command: {}",
                    group
                ))),
            )
            .await?;

            return Ok(Flow::Continue);
        }
    };

    let reply = reply.unwrap_or_else(|e| Reply::Line(ctx.gateway.bind_error(&e)));
    write_reply(io, ctx.state, reply).await?;
    Ok(Flow::Continue)
}

async fn write_reply(
    io: &mut ConnectionIo,
    state: &mut ConnState,
    reply: Reply,
) -> Result<(), BridgeError> {
    let (envelope, raw) = match reply {
        Reply::Line(envelope) => (envelope, None),
        Reply::Raw(envelope, data) => (envelope, Some(data)),
    };

    if let ReturnValue::Error(ErrorKind::Exception(Some(id))) = &envelope {
        state.last_exception = Some(id.clone());
    }

    let mut line = envelope.encode();
    line.push('\n');
    io.write_all(line.as_bytes()).await?;

    if let Some(data) = raw {
        io.write_all(&data).await?;
    }

    Ok(())
}
