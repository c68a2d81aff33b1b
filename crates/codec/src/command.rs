//! Command table line constants.
//!
//! The dispatcher matches the first line of every request against these
//! group names exactly, a subcommand line follows for every group except
//! shutdown and auth.

/// Terminates the body of every command.
pub const END: &str = "e";

/// Method calls and constructor invocations.
pub const CORE: &str = "c";
/// Field read/write.
pub const FIELD: &str = "f";
/// Element operations on a registered list.
pub const LIST: &str = "l";
/// Element operations on a registered fixed-length array.
pub const ARRAY: &str = "a";
/// Element operations on a registered map.
pub const MAP: &str = "d";
/// Element operations on a registered set.
pub const SET: &str = "s";
/// Registry lifetime management.
pub const MEMORY: &str = "m";
/// Import view management.
pub const VIEW: &str = "j";
/// Name classification and member listing.
pub const REFLECTION: &str = "r";
/// Pretty printed signature pages.
pub const HELP: &str = "h";
/// Raw blob transfer.
pub const STREAM: &str = "b";
/// Last bound exception of the connection.
pub const EXCEPTION: &str = "x";
/// Clean connection shutdown, no subcommand, no body, no reply.
pub const SHUTDOWN: &str = "q";
/// Shared token auth preamble, sent first when auth is enabled.
pub const AUTH: &str = "A";

pub mod core {
    pub const CALL: &str = "call";
    pub const CONSTRUCTOR: &str = "constructor";
}

pub mod field {
    pub const GET: &str = "get";
    pub const SET: &str = "set";
}

pub mod list {
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const SIZE: &str = "size";
    pub const APPEND: &str = "append";
    pub const SLICE: &str = "slice";
    pub const CONTAINS: &str = "contains";
    pub const REMOVE: &str = "remove";
}

pub mod array {
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const LEN: &str = "len";
    pub const SLICE: &str = "slice";
}

pub mod map {
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const REMOVE: &str = "remove";
    pub const SIZE: &str = "size";
    pub const CONTAINS: &str = "contains";
    pub const KEYS: &str = "keys";
}

pub mod set {
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
    pub const CONTAINS: &str = "contains";
    pub const SIZE: &str = "size";
}

pub mod memory {
    pub const RELEASE: &str = "release";
    pub const ATTACH: &str = "attach";
}

pub mod view {
    pub const CREATE: &str = "create";
    pub const IMPORT: &str = "import";
    pub const REMOVE_IMPORT: &str = "remove_import";
}

pub mod reflection {
    pub const UNKNOWN: &str = "unknown";
    pub const DIR: &str = "dir";
}

pub mod help {
    pub const OBJECT: &str = "object";
    pub const CLASS: &str = "class";
}

pub mod stream {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
}

pub mod exception {
    pub const GET: &str = "get";
}
