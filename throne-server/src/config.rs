//! Server configuration from environment variables and command-line flags.
//!
//! Flags override environment variables, which override defaults.

use std::path::PathBuf;

use throne::transport::ServerConfig;

pub const USAGE: &str = "\
Usage: throne [--host <addr>] [--port <port>] [--journal <path>] [--await-explicit-shutdown]

Options:
  --host <addr>                Bind address [env: THRONE_HOST] [default: 0.0.0.0]
  --port <port>                Bind port [env: THRONE_PORT] [default: 8001]
  --journal <path>             Append queue transitions to a JSON-lines file [env: THRONE_JOURNAL]
  --await-explicit-shutdown    Ignore SIGTERM; stop on /shutdown or SIGINT
                               [env: THRONE_AWAIT_EXPLICIT_SHUTDOWN]";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("invalid boolean '{value}' for {name}")]
    InvalidBool { name: &'static str, value: String },
    /// `--help` was requested.
    #[error("")]
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub server: ServerConfig,
    /// Ledger file; `None` logs transitions instead.
    pub journal: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(|key| std::env::var(key).ok(), &args)
    }

    /// `args` includes argv[0].
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        args: &[String],
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(host) = env("THRONE_HOST").filter(|h| !h.is_empty()) {
            config.server.host = host;
        }
        if let Some(port) = env("THRONE_PORT") {
            config.server.port = parse_port(&port)?;
        }
        if let Some(path) = env("THRONE_JOURNAL").filter(|p| !p.is_empty()) {
            config.journal = Some(PathBuf::from(path));
        }
        if let Some(flag) = env("THRONE_AWAIT_EXPLICIT_SHUTDOWN") {
            config.server.await_explicit_shutdown =
                parse_bool("THRONE_AWAIT_EXPLICIT_SHUTDOWN", &flag)?;
        }

        let mut i = 1; // skip argv[0]
        while i < args.len() {
            match args[i].as_str() {
                "--host" => {
                    i += 1;
                    config.server.host = args
                        .get(i)
                        .ok_or(ConfigError::MissingValue("--host"))?
                        .clone();
                }
                "--port" => {
                    i += 1;
                    let port = args.get(i).ok_or(ConfigError::MissingValue("--port"))?;
                    config.server.port = parse_port(port)?;
                }
                "--journal" => {
                    i += 1;
                    let path = args.get(i).ok_or(ConfigError::MissingValue("--journal"))?;
                    config.journal = Some(PathBuf::from(path));
                }
                "--await-explicit-shutdown" => config.server.await_explicit_shutdown = true,
                "--help" | "-h" => return Err(ConfigError::Help),
                arg if arg.starts_with('-') => {
                    return Err(ConfigError::UnknownFlag(arg.to_string()));
                }
                arg => return Err(ConfigError::UnexpectedArgument(arg.to_string())),
            }
            i += 1;
        }

        Ok(config)
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(value.to_string()))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}
