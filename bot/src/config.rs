use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::irc::translate::canonical_channel;

/// Top-level bot configuration, loaded from chatwatch.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub twitch: TwitchSection,
    pub discovery: DiscoverySection,
    pub stats: StatsSection,
    pub axiom: AxiomSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwitchSection {
    pub host: String,
    pub port: u16,
    /// Wrap the IRC connection in TLS. Requires `ca_file`.
    pub tls: bool,
    /// PEM bundle of trusted root certificates for TLS.
    pub ca_file: Option<String>,
    /// Login name. Anonymous (read-only) login when unset.
    pub username: Option<String>,
    pub oauth_token: Option<String>,
    /// Channels joined unconditionally before any discovery phase.
    pub bootstrap_channels: Vec<String>,
    pub join_timeout_secs: u64,
    pub joins_per_window: u32,
    pub join_window_secs: u64,
}

impl Default for TwitchSection {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".into(),
            port: 6667,
            tls: false,
            ca_file: None,
            username: None,
            oauth_token: None,
            bootstrap_channels: vec!["imlunahey".into()],
            join_timeout_secs: 20,
            joins_per_window: 20,
            join_window_secs: 10,
        }
    }
}

impl TwitchSection {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Maximum channels requested from analytics per phase.
    pub batch_size: usize,
    /// Pause between the end of one phase and the start of the next.
    pub cooldown_secs: u64,
    /// Stop after this many phases. Unset means keep discovering forever.
    pub max_phases: Option<u32>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            batch_size: 100,
            cooldown_secs: 600,
            max_phases: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    pub interval_secs: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxiomSection {
    pub url: String,
    /// API token. Analytics and remote logging are disabled without it.
    pub token: Option<String>,
    pub dataset: String,
    /// How far back the top-channels query looks.
    pub lookback_hours: i64,
}

impl Default for AxiomSection {
    fn default() -> Self {
        Self {
            url: "https://api.axiom.co".into(),
            token: None,
            dataset: "twitch".into(),
            lookback_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub service: String,
    pub commit: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            service: "app".into(),
            commit: None,
        }
    }
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            Self::from_toml(path, &contents)?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_toml(path: &str, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TWITCH_HOST") {
            self.twitch.host = v;
        }
        if let Ok(v) = std::env::var("TWITCH_PORT")
            && let Ok(port) = v.parse()
        {
            self.twitch.port = port;
        }
        if let Ok(v) = std::env::var("TWITCH_TLS")
            && let Ok(tls) = v.parse()
        {
            self.twitch.tls = tls;
        }
        if let Ok(v) = std::env::var("TWITCH_CA_FILE") {
            self.twitch.ca_file = Some(v);
        }
        if let Ok(v) = std::env::var("TWITCH_USERNAME") {
            self.twitch.username = Some(v);
        }
        if let Ok(v) = std::env::var("TWITCH_OAUTH_TOKEN") {
            self.twitch.oauth_token = Some(v);
        }
        if let Ok(v) = std::env::var("BOOTSTRAP_CHANNELS") {
            self.twitch.bootstrap_channels = split_list(&v);
        }
        if let Ok(v) = std::env::var("DISCOVERY_BATCH_SIZE")
            && let Ok(n) = v.parse()
        {
            self.discovery.batch_size = n;
        }
        if let Ok(v) = std::env::var("DISCOVERY_COOLDOWN_SECS")
            && let Ok(secs) = v.parse()
        {
            self.discovery.cooldown_secs = secs;
        }
        if let Ok(v) = std::env::var("DISCOVERY_MAX_PHASES")
            && let Ok(n) = v.parse()
        {
            self.discovery.max_phases = Some(n);
        }
        if let Ok(v) = std::env::var("STATS_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.stats.interval_secs = secs;
        }
        if let Ok(v) = std::env::var("AXIOM_URL") {
            self.axiom.url = v;
        }
        if let Ok(v) = std::env::var("AXIOM_TOKEN") {
            self.axiom.token = Some(v);
        }
        if let Ok(v) = std::env::var("AXIOM_DATASET") {
            self.axiom.dataset = v;
        }
        if let Ok(v) = std::env::var("SERVICE_NAME") {
            self.logging.service = v;
        }
        if let Ok(v) =
            std::env::var("RAILWAY_GIT_COMMIT_SHA").or_else(|_| std::env::var("GIT_COMMIT_SHA"))
        {
            self.logging.commit = Some(v);
        }
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.batch_size == 0 {
            return Err(ConfigError::Invalid("discovery.batch_size must be > 0".into()));
        }
        if self.stats.interval_secs == 0 {
            return Err(ConfigError::Invalid("stats.interval_secs must be > 0".into()));
        }
        if self.twitch.joins_per_window == 0 || self.twitch.join_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "twitch.joins_per_window and twitch.join_window_secs must be > 0".into(),
            ));
        }
        if self
            .twitch
            .bootstrap_channels
            .iter()
            .all(|c| canonical_channel(c.trim()).is_empty())
        {
            return Err(ConfigError::Invalid(
                "twitch.bootstrap_channels must name at least one channel".into(),
            ));
        }
        if self.twitch.tls && self.twitch.ca_file.is_none() {
            return Err(ConfigError::Invalid(
                "twitch.tls requires twitch.ca_file".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.discovery.cooldown_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
