use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Pull updates with getUpdates in addition to the webhook.
    #[serde(default)]
    pub polling: bool,
    /// Long-poll wait. The HTTP client timeout is derived from it.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeneralConfig {
    #[serde(default)]
    pub environment: Environment,
}

const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_db_path() -> PathBuf {
    PathBuf::from("memebot.db")
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            polling: false,
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl Config {
    /// Long polling runs when asked for explicitly or in development.
    pub fn polling_enabled(&self) -> bool {
        self.telegram.polling || self.general.environment == Environment::Development
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.poll_timeout_secs)
    }

    /// Bot API request timeout; a long poll has to finish inside it.
    pub fn request_timeout(&self) -> Duration {
        self.poll_timeout() + REQUEST_TIMEOUT_MARGIN
    }

    /// Read `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `POLLING` enables polling by being set at all, whatever its value.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = var("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if var("POLLING").is_some() {
            self.telegram.polling = true;
        }
        if let Some(env) = var("APP_ENV") {
            self.general.environment = match env.to_lowercase().as_str() {
                "development" | "dev" => Environment::Development,
                "production" | "prod" => Environment::Production,
                other => bail!("Unknown APP_ENV '{}'", other),
            };
        }
        if let Some(path) = var("DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(addr) = var("LISTEN_ADDR") {
            self.server.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid LISTEN_ADDR '{}'", addr))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let token = &self.telegram.bot_token;
        if token.is_empty() {
            bail!("Bot token is required (set BOT_TOKEN or [telegram] bot_token)");
        }
        // Telegram tokens look like {bot_id}:{secret}
        match token.split_once(':') {
            Some((id, secret))
                if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) && !secret.is_empty() => {}
            _ => bail!("Bot token must look like <bot id>:<secret>"),
        }
        if self.telegram.poll_timeout_secs == 0 {
            bail!("poll_timeout_secs must be at least 1");
        }
        Ok(())
    }
}
