//! Configuration for the client and the server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. The result is one
//! immutable value per binary that is passed to whatever needs it.

use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::Request;

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "simple_message_client")]
#[command(version)]
#[command(about = "Post a message to a simple message server", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host name or address
    #[arg(short, long)]
    pub server: String,

    /// Server port
    #[arg(short, long)]
    pub port: u16,

    /// User name
    #[arg(short, long)]
    pub user: String,

    /// Optional image URL
    #[arg(short, long)]
    pub image: Option<String>,

    /// Message text
    #[arg(short, long)]
    pub message: String,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where received attachments are written
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Connect deadline in seconds (0 = none)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Send deadline in seconds (0 = none)
    #[arg(long)]
    pub send_timeout: Option<u64>,

    /// Longest wait for any single read of the response, in seconds (0 = none)
    #[arg(long)]
    pub receive_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "simple_message_server")]
#[command(version)]
#[command(about = "Spawning TCP server for the simple message protocol", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (defaults to all interfaces)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Pending-connection backlog (clamped to the system maximum)
    #[arg(short, long)]
    pub backlog: Option<u32>,

    /// Business-logic executable run for each connection
    #[arg(short = 'e', long)]
    pub collaborator: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_io_timeout")]
    pub send_timeout: u64,
    #[serde(default = "default_io_timeout")]
    pub receive_timeout: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            connect_timeout: default_connect_timeout(),
            send_timeout: default_io_timeout(),
            receive_timeout: default_io_timeout(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    pub port: Option<u16>,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_collaborator")]
    pub collaborator: PathBuf,
    #[serde(default)]
    pub collaborator_args: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            backlog: default_backlog(),
            collaborator: default_collaborator(),
            collaborator_args: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    30
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_backlog() -> u32 {
    128
}

fn default_collaborator() -> PathBuf {
    PathBuf::from("/usr/local/bin/simple_message_server_logic")
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn load_toml(path: Option<&Path>) -> Result<TomlConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub image: Option<String>,
    pub message: String,
    pub verbose: bool,
    pub output_dir: PathBuf,
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    /// Idle limit per read while receiving; the whole transfer may take longer.
    pub receive_timeout: Option<Duration>,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    pub fn from_args(cli: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(cli.config.as_deref())?;
        let section = toml_config.client;

        let log_level = if cli.verbose {
            "debug".to_string()
        } else {
            cli.log_level
                .or(toml_config.logging.level)
                .unwrap_or_else(|| "warn".to_string())
        };

        Ok(ClientConfig {
            server: cli.server,
            port: cli.port,
            user: cli.user,
            image: cli.image,
            message: cli.message,
            verbose: cli.verbose,
            output_dir: cli.output_dir.unwrap_or(section.output_dir),
            connect_timeout: seconds(cli.connect_timeout.unwrap_or(section.connect_timeout)),
            send_timeout: seconds(cli.send_timeout.unwrap_or(section.send_timeout)),
            receive_timeout: seconds(cli.receive_timeout.unwrap_or(section.receive_timeout)),
            log_level,
        })
    }

    /// The request this invocation sends.
    pub fn request(&self) -> Request {
        Request {
            user: self.user.clone(),
            image: self.image.clone(),
            message: self.message.clone(),
        }
    }
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
    pub collaborator: PathBuf,
    pub collaborator_args: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(cli.config.as_deref())?;
        let section = toml_config.server;

        let port = cli.port.or(section.port).ok_or(ConfigError::MissingPort)?;

        Ok(ServerConfig {
            host: cli.host.unwrap_or(section.host),
            port,
            backlog: cli.backlog.unwrap_or(section.backlog),
            collaborator: cli.collaborator.unwrap_or(section.collaborator),
            collaborator_args: section.collaborator_args,
            log_level: cli
                .log_level
                .or(toml_config.logging.level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
}

impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::FileRead(_, e) => e.raw_os_error().unwrap_or(1),
            _ => 1,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingPort => {
                write!(f, "No port given (use --port or [server] port)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.client.output_dir, PathBuf::from("."));
        assert_eq!(config.client.connect_timeout, 10);
        assert_eq!(config.server.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.server.backlog, 128);
        assert!(config.server.port.is_none());
        assert!(config.logging.level.is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [client]
            output_dir = "/tmp/inbox"
            receive_timeout = 0

            [server]
            host = "::"
            port = 6789
            backlog = 16
            collaborator = "/opt/logic"
            collaborator_args = ["--board", "main"]

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.client.output_dir, PathBuf::from("/tmp/inbox"));
        assert_eq!(config.client.receive_timeout, 0);
        assert_eq!(config.client.send_timeout, 30);
        assert_eq!(config.server.host, "::".parse::<IpAddr>().unwrap());
        assert_eq!(config.server.port, Some(6789));
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.collaborator, PathBuf::from("/opt/logic"));
        assert_eq!(config.server.collaborator_args, vec!["--board", "main"]);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_client_args() {
        let cli = ClientArgs::try_parse_from([
            "simple_message_client",
            "-s",
            "localhost",
            "-p",
            "6789",
            "-u",
            "bob",
            "-m",
            "ping",
            "--receive-timeout",
            "0",
        ])
        .unwrap();
        let config = ClientConfig::from_args(cli).unwrap();

        assert_eq!(config.server, "localhost");
        assert_eq!(config.port, 6789);
        assert_eq!(config.request(), Request::new("bob", "ping"));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.receive_timeout, None);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_client_verbose_raises_log_level() {
        let cli = ClientArgs::try_parse_from([
            "simple_message_client",
            "-s",
            "localhost",
            "-p",
            "6789",
            "-u",
            "bob",
            "-m",
            "ping",
            "-i",
            "http://x/y.png",
            "-v",
        ])
        .unwrap();
        let config = ClientConfig::from_args(cli).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.request().image.as_deref(), Some("http://x/y.png"));
    }

    #[test]
    fn test_client_requires_message() {
        let result = ClientArgs::try_parse_from([
            "simple_message_client",
            "-s",
            "localhost",
            "-p",
            "6789",
            "-u",
            "bob",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_args() {
        let cli = ServerArgs::try_parse_from(["simple_message_server", "-p", "6789"]).unwrap();
        let config = ServerConfig::from_args(cli).unwrap();

        assert_eq!(config.port, 6789);
        assert_eq!(config.backlog, 128);
        assert_eq!(
            config.collaborator,
            PathBuf::from("/usr/local/bin/simple_message_server_logic")
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_server_requires_port() {
        let cli = ServerArgs::try_parse_from(["simple_message_server"]).unwrap();
        assert!(matches!(
            ServerConfig::from_args(cli),
            Err(ConfigError::MissingPort)
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = ServerArgs::try_parse_from([
            "simple_message_server",
            "-c",
            "/nonexistent/simple_message.toml",
        ])
        .unwrap();
        match ServerConfig::from_args(cli) {
            Err(err @ ConfigError::FileRead(..)) => assert_ne!(err.exit_code(), 0),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
