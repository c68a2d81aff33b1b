//! Return envelopes.
//!
//! The single response line of every command, and the reply line the
//! peer sends back for host initiated callbacks. Container envelopes
//! carry the registered id plus a size snapshot taken at return time;
//! iterators carry no size because computing one would consume them.

use crate::{Error, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// The invoked code threw. The throwable is bound in the registry
    /// under the carried id so the peer can inspect it; the id is absent
    /// only when binding was impossible.
    Exception(Option<String>),
    /// The referenced id is not bound and is not a resolvable static id.
    ObjectNotFound,
    /// Malformed input, unknown tag, out-of-range index.
    Protocol(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Null,
    Void,
    Primitive(Token),
    Reference(String),
    List { id: String, size: usize },
    Map { id: String, size: usize },
    Set { id: String, size: usize },
    Array { id: String, length: usize },
    Iterator { id: String },
    /// A name resolved to a class, carries the fully qualified name.
    Class(String),
    /// A name resolved to a package prefix.
    Package(String),
    Error(ErrorKind),
}

impl ReturnValue {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Error(ErrorKind::Protocol(Some(message.into())))
    }

    pub fn exception(id: impl Into<String>) -> Self {
        Self::Error(ErrorKind::Exception(Some(id.into())))
    }

    pub const OBJECT_NOT_FOUND: Self = Self::Error(ErrorKind::ObjectNotFound);

    /// Encodes the full response line, without the line terminator.
    pub fn encode(&self) -> String {
        match self {
            Self::Null => "yn".to_string(),
            Self::Void => "yrv".to_string(),
            Self::Primitive(token) => format!("y{}", token.encode()),
            Self::Reference(id) => format!("yr{}", id),
            Self::List { id, size } => format!("yl{},{}", id, size),
            Self::Map { id, size } => format!("ya{},{}", id, size),
            Self::Set { id, size } => format!("yh{},{}", id, size),
            Self::Array { id, length } => format!("yA{},{}", id, length),
            Self::Iterator { id } => format!("yu{}", id),
            Self::Class(name) => format!("yk{}", name),
            Self::Package(name) => format!("yg{}", name),
            Self::Error(ErrorKind::Exception(Some(id))) => format!("!x{}", id),
            Self::Error(ErrorKind::Exception(None)) => "!x".to_string(),
            Self::Error(ErrorKind::ObjectNotFound) => "!o".to_string(),
            Self::Error(ErrorKind::Protocol(Some(message))) => {
                format!("!p{}", crate::escape(message))
            }
            Self::Error(ErrorKind::Protocol(None)) => "!p".to_string(),
        }
    }

    pub fn decode(line: &str) -> Result<Self, Error> {
        let Some(marker) = line.chars().next() else {
            return Err(Error::EmptyLine);
        };

        let payload = &line[marker.len_utf8()..];
        match marker {
            '!' => Self::decode_error(payload),
            'y' => Self::decode_value(payload),
            _ => Err(Error::BadEnvelope),
        }
    }

    fn decode_error(payload: &str) -> Result<Self, Error> {
        let Some(kind) = payload.chars().next() else {
            return Err(Error::BadEnvelope);
        };

        let rest = &payload[kind.len_utf8()..];
        Ok(match kind {
            'x' if rest.is_empty() => Self::Error(ErrorKind::Exception(None)),
            'x' => Self::Error(ErrorKind::Exception(Some(rest.to_string()))),
            'o' => Self::Error(ErrorKind::ObjectNotFound),
            'p' if rest.is_empty() => Self::Error(ErrorKind::Protocol(None)),
            'p' => Self::Error(ErrorKind::Protocol(Some(crate::unescape(rest)))),
            _ => return Err(Error::BadEnvelope),
        })
    }

    fn decode_value(payload: &str) -> Result<Self, Error> {
        let Some(tag) = payload.chars().next() else {
            return Err(Error::BadEnvelope);
        };

        if !tag.is_ascii() {
            return Err(Error::UnknownTag(tag));
        }

        let rest = &payload[1..];
        Ok(match tag {
            'n' => Self::Null,
            'r' => match rest {
                "v" => Self::Void,
                "n" => Self::Null,
                "" => return Err(Error::BadReference),
                id => Self::Reference(id.to_string()),
            },
            // `l` is a long in argument position; in an envelope it may
            // also open a list. Ids never start with a digit or a sign.
            'l' if rest.starts_with(|char: char| char.is_ascii_digit() || char == '-') => {
                Self::Primitive(Token::decode(payload)?)
            }
            'l' => {
                let (id, size) = sized(rest)?;
                Self::List { id, size }
            }
            'a' => {
                let (id, size) = sized(rest)?;
                Self::Map { id, size }
            }
            'h' => {
                let (id, size) = sized(rest)?;
                Self::Set { id, size }
            }
            'A' => {
                let (id, length) = sized(rest)?;
                Self::Array { id, length }
            }
            'u' if !rest.is_empty() => Self::Iterator {
                id: rest.to_string(),
            },
            'k' if !rest.is_empty() => Self::Class(rest.to_string()),
            'g' if !rest.is_empty() => Self::Package(rest.to_string()),
            't' | 'f' if !rest.is_empty() => return Err(Error::BadEnvelope),
            'b' | 'i' | 'd' | 'c' | 's' | 'j' | 'D' | 't' | 'f' => {
                Self::Primitive(Token::decode(payload)?)
            }
            tag => return Err(Error::UnknownTag(tag)),
        })
    }
}

/// Splits the `<id>,<size>` payload of a container envelope.
fn sized(payload: &str) -> Result<(String, usize), Error> {
    let Some((id, size)) = payload.rsplit_once(',') else {
        return Err(Error::BadEnvelope);
    };

    if id.is_empty() {
        return Err(Error::BadReference);
    }

    Ok((id.to_string(), size.parse().map_err(|_| Error::BadEnvelope)?))
}
