//! Bridge configuration: TOML file first, command line on top

use crate::hasher::{ConfiguredHasher, ExternalHasher, NativeHasher};
use crate::lifecycle::LOGIN_ATTEMPTS;
use crate::session::SessionTimeouts;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub lobby: LobbySection,
    pub irc: IrcSection,
    pub bot: BotSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySection {
    pub host: String,
    pub port: u16,
    /// Client version announced during negotiation
    pub version: String,
    pub username: String,
    pub password: String,
    pub enabled: bool,
    /// `native`, or the path of a helper binary called as `<bin> <password> <salt>`
    pub hasher: String,
    pub reply_timeout_secs: u64,
    pub read_timeout_ms: u64,
    pub login_attempts: u32,
}

impl Default for LobbySection {
    fn default() -> Self {
        Self {
            host: "server.wesnoth.org".to_string(),
            port: shared::DEFAULT_LOBBY_PORT,
            version: shared::DEFAULT_PROTOCOL_VERSION.to_string(),
            username: "lobbybridge".to_string(),
            password: String::new(),
            enabled: true,
            hasher: "native".to_string(),
            reply_timeout_secs: 10,
            read_timeout_ms: 1000,
            login_attempts: LOGIN_ATTEMPTS,
        }
    }
}

impl LobbySection {
    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            reply: Duration::from_secs(self.reply_timeout_secs),
        }
    }

    pub fn password_hasher(&self) -> ConfiguredHasher {
        match self.hasher.as_str() {
            "" | "native" => ConfiguredHasher::Native(NativeHasher),
            binary => ConfiguredHasher::External(ExternalHasher::new(binary)),
        }
    }

    /// Local servers grant masters admin rights without registration
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcSection {
    pub network: String,
    /// Fallbacks used when the current network refuses more connections
    pub alt_networks: Vec<String>,
    pub port: u16,
    pub nick: String,
    pub password: String,
    pub channel: String,
    pub enabled: bool,
    /// Names that get a zero-width space so relayed text does not ping them
    pub no_highlight: Vec<String>,
    /// Relay public lobby chat, not just whispers, to the channel
    pub relay_public: bool,
}

impl Default for IrcSection {
    fn default() -> Self {
        Self {
            network: "irc.libera.chat".to_string(),
            alt_networks: Vec::new(),
            port: 6667,
            nick: "lobbybridge".to_string(),
            password: String::new(),
            channel: "#lobbybridge".to_string(),
            enabled: true,
            no_highlight: Vec::new(),
            relay_public: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSection {
    pub masters: Vec<String>,
    pub trusted: Vec<String>,
    pub prefix: String,
    pub reconnect_delay_secs: u64,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            masters: Vec::new(),
            trusted: Vec::new(),
            prefix: "!".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

impl BotSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Lobby bridge command-line arguments.
///
/// CLI values override settings loaded from the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "lobby-bridge", author, version, about, long_about = None)]
pub struct CliArgs {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lobby server host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Lobby server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Lobby user name
    #[arg(short, long)]
    pub username: Option<String>,

    /// Lobby password
    #[arg(long)]
    pub password: Option<String>,

    /// IRC network host
    #[arg(long)]
    pub irc_network: Option<String>,

    /// IRC home channel
    #[arg(long)]
    pub irc_channel: Option<String>,

    /// Do not connect to the lobby
    #[arg(long)]
    pub no_lobby: bool,

    /// Do not connect to IRC
    #[arg(long)]
    pub no_irc: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reads the file named by `--config`, if any, and applies the flags
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.host {
            self.lobby.host = host.clone();
        }
        if let Some(port) = args.port {
            self.lobby.port = port;
        }
        if let Some(ref name) = args.username {
            self.lobby.username = name.clone();
        }
        if let Some(ref password) = args.password {
            self.lobby.password = password.clone();
        }
        if let Some(ref network) = args.irc_network {
            self.irc.network = network.clone();
        }
        if let Some(ref channel) = args.irc_channel {
            self.irc.channel = channel.clone();
        }
        if args.no_lobby {
            self.lobby.enabled = false;
        }
        if args.no_irc {
            self.irc.enabled = false;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lobby.enabled && self.lobby.username.is_empty() {
            return Err(ConfigError::Invalid("lobby.username is empty".to_string()));
        }
        if self.lobby.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lobby.read_timeout_ms must be positive".to_string()));
        }
        if self.lobby.login_attempts == 0 {
            return Err(ConfigError::Invalid("lobby.login_attempts must be positive".to_string()));
        }
        if self.irc.enabled && !self.irc.channel.starts_with('#') {
            return Err(ConfigError::Invalid(format!(
                "irc.channel `{}` must start with #",
                self.irc.channel
            )));
        }
        Ok(())
    }
}
