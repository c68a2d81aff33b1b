use std::{fs::read_to_string, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// gateway listen address
    ///
    /// The address and port the gateway binds for inbound peer
    /// connections. Loopback by default; exposing the gateway beyond
    /// the local host should go together with an auth token.
    ///
    #[serde(default = "Server::bind")]
    pub listen: SocketAddr,
    ///
    /// reply timeout
    ///
    /// Upper bound in milliseconds on waiting for a callback reply in
    /// non-blocking mode. Blocking sends wait forever.
    ///
    #[serde(default = "Server::reply_timeout")]
    pub reply_timeout: u64,
}

impl Server {
    fn bind() -> SocketAddr {
        "127.0.0.1:25333".parse().unwrap()
    }

    fn reply_timeout() -> u64 {
        1000
    }

    pub fn reply_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.reply_timeout)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: Self::bind(),
            reply_timeout: Self::reply_timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Callback {
    ///
    /// peer callback endpoint
    ///
    /// Address of the callback server the peer runs for host initiated
    /// calls outside of any inbound command.
    ///
    pub endpoint: SocketAddr,
    ///
    /// Maximum number of idle sockets kept toward the callback server.
    ///
    #[serde(default = "Callback::pool_size")]
    pub pool_size: usize,
}

impl Callback {
    fn pool_size() -> usize {
        4
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// shared auth token
    ///
    /// When set, every inbound connection must present this token as
    /// its first command, and the callback client sends it on connect.
    ///
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub callback: Option<Callback>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: bridge-server --config /etc/bridge/config.toml
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration file,
    /// otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => toml::from_str::<Self>(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }
}
