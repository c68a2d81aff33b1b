//! Typed argument tokens.
//!
//! Every argument line carries a one character type tag followed by the
//! payload. The decoder never reads past the line it is given.

use base64::{Engine, prelude::BASE64_STANDARD};

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    /// Arbitrary precision decimal, carried as validated text. The host
    /// does not compute with these, it only relays them.
    Decimal(String),
    /// Id of an object bound in the host registry, or a static id.
    Reference(String),
    /// Id of an object owned by the peer. Invoking it routes back over
    /// the wire.
    Proxy(String),
}

impl Token {
    pub fn decode(line: &str) -> Result<Self, Error> {
        let Some(tag) = line.chars().next() else {
            return Err(Error::EmptyLine);
        };

        if !tag.is_ascii() {
            return Err(Error::UnknownTag(tag));
        }

        let payload = &line[1..];
        Ok(match tag {
            'n' => Self::Null,
            't' => Self::Bool(true),
            'f' => Self::Bool(false),
            'b' => match payload {
                "True" => Self::Bool(true),
                "False" => Self::Bool(false),
                _ => return Err(Error::BadBoolean),
            },
            'i' => match payload.parse::<i32>() {
                Ok(value) => Self::Int(value),
                // A well-formed number that does not fit is an overflow,
                // anything else is garbage.
                Err(_) if payload.parse::<i64>().is_ok() => {
                    return Err(Error::IntegerOverflow);
                }
                Err(_) => return Err(Error::BadNumber),
            },
            'l' => match payload.parse::<i64>() {
                Ok(value) => Self::Long(value),
                Err(_) if payload.parse::<i128>().is_ok() => {
                    return Err(Error::IntegerOverflow);
                }
                Err(_) => return Err(Error::BadNumber),
            },
            'd' => Self::Double(payload.parse().map_err(|_| Error::BadNumber)?),
            'c' => {
                let mut chars = payload.chars();
                match (chars.next(), chars.next()) {
                    (Some(char), None) => Self::Char(char),
                    _ => return Err(Error::BadCharacter),
                }
            }
            's' => Self::Str(crate::unescape(payload)),
            'j' => Self::Bytes(
                BASE64_STANDARD
                    .decode(payload)
                    .map_err(|_| Error::BadBase64)?,
            ),
            'D' => {
                if !is_decimal(payload) {
                    return Err(Error::BadDecimal);
                }

                Self::Decimal(payload.to_string())
            }
            'r' => {
                if payload.is_empty() {
                    return Err(Error::BadReference);
                }

                Self::Reference(payload.to_string())
            }
            'p' => {
                if payload.is_empty() {
                    return Err(Error::BadReference);
                }

                Self::Proxy(payload.to_string())
            }
            tag => return Err(Error::UnknownTag(tag)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Null => "n".to_string(),
            Self::Bool(true) => "t".to_string(),
            Self::Bool(false) => "f".to_string(),
            Self::Int(value) => format!("i{}", value),
            Self::Long(value) => format!("l{}", value),
            Self::Double(value) => {
                if value.is_nan() {
                    "dNaN".to_string()
                } else if value.is_infinite() {
                    if value.is_sign_negative() {
                        "d-Infinity".to_string()
                    } else {
                        "dInfinity".to_string()
                    }
                } else {
                    format!("d{}", value)
                }
            }
            Self::Char(value) => format!("c{}", value),
            Self::Str(value) => format!("s{}", crate::escape(value)),
            Self::Bytes(value) => format!("j{}", BASE64_STANDARD.encode(value)),
            Self::Decimal(value) => format!("D{}", value),
            Self::Reference(id) => format!("r{}", id),
            Self::Proxy(id) => format!("p{}", id),
        }
    }

    /// Whether the token is a plain value rather than an object id.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Reference(_) | Self::Proxy(_))
    }
}

/// Validates the textual form of a decimal: optional sign, digits, at
/// most one fraction point, digits on at least one side.
fn is_decimal(input: &str) -> bool {
    let unsigned = input
        .strip_prefix(['-', '+'])
        .unwrap_or(input);

    if unsigned.is_empty() {
        return false;
    }

    let mut digits = 0;
    let mut points = 0;
    for char in unsigned.chars() {
        match char {
            '0'..='9' => digits += 1,
            '.' => points += 1,
            _ => return false,
        }
    }

    digits > 0 && points <= 1
}
