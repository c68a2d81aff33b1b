//! ## Bridge wire protocol
//!
//! The protocol exchanged between the host gateway and its peer is line
//! oriented and UTF-8 encoded. A request is a command group line, a
//! subcommand line and any number of typed argument lines, closed by the
//! end-of-command line `e`. The response to a command is always a single
//! line: `y` followed by an encoded [`ReturnValue`] on success, `!`
//! followed by an error kind on failure.
//!
//! This crate only understands single lines. Framing, sockets and command
//! routing live in the server; everything here is pure string work and
//! never panics on peer input.

pub mod command;
pub mod envelope;
pub mod token;

pub use self::{
    envelope::{ErrorKind, ReturnValue},
    token::Token,
};

/// Marker prefix of a static id. `z:java.lang.Math` names the class
/// itself rather than a registry binding, such ids are resolved on demand
/// and never stored.
pub const STATIC_MARKER: &str = "z:";

/// Well known id of the user supplied entry point object.
pub const ENTRY_POINT_ID: &str = "t";

/// Well known id of the default import view.
pub const DEFAULT_VIEW_ID: &str = "j";

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    EmptyLine,
    UnknownTag(char),
    IntegerOverflow,
    BadNumber,
    BadBoolean,
    BadCharacter,
    BadBase64,
    BadDecimal,
    BadReference,
    BadEnvelope,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Escapes a string payload for transmission as a single line.
///
/// # Example
///
/// ```
/// assert_eq!(bridge_server_codec::escape("a\nb"), "a\\nb");
/// ```
pub fn escape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for char in input.chars() {
        match char {
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            char => output.push(char),
        }
    }

    output
}

/// Reverses [`escape`]. A trailing or unknown escape sequence is kept
/// verbatim rather than rejected, the peer libraries have always been
/// lenient here.
pub fn unescape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(char) = chars.next() {
        if char != '\\' {
            output.push(char);
            continue;
        }

        match chars.next() {
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some('\\') => output.push('\\'),
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }

    output
}

/// Whether an id names a static class reference instead of a registry
/// binding.
pub fn is_static_id(id: &str) -> bool {
    id.starts_with(STATIC_MARKER)
}
