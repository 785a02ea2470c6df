// Client configuration for koschat
// Loaded from <config_dir>/koschat/config.json, then overridden by environment variables

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_CHAT_URL: &str = "KOSCHAT_CHAT_URL";
pub const ENV_AUTH_URL: &str = "KOSCHAT_AUTH_URL";
pub const ENV_TOKEN: &str = "KOSCHAT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the chat service (push stream and message mutations)
    pub chat_url: String,
    /// Base URL of the auth service, used to resolve the current user
    pub auth_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Capacity of the reconciler notification channel
    pub notify_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            chat_url: "http://localhost:8080".to_string(),
            auth_url: "http://localhost:8081".to_string(),
            access_token: None,
            request_timeout_secs: 15,
            notify_buffer: 100,
        }
    }
}

impl ChatConfig {
    /// Load the config file if it exists and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match load_config_file()? {
            Some(config) => config,
            None => {
                debug!("No config file found, using defaults");
                ChatConfig::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_CHAT_URL) {
            self.chat_url = url;
        }
        if let Ok(url) = std::env::var(ENV_AUTH_URL) {
            self.auth_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            if !token.trim().is_empty() {
                self.access_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("chat_url", &self.chat_url), ("auth_url", &self.auth_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("{} must be an http(s) URL, got '{}'", name, url));
            }
        }
        if self.notify_buffer == 0 {
            return Err(anyhow!("notify_buffer must be greater than zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Chat service base URL without a trailing slash.
    pub fn chat_base(&self) -> &str {
        self.chat_url.trim_end_matches('/')
    }

    pub fn auth_base(&self) -> &str {
        self.auth_url.trim_end_matches('/')
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("koschat");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

pub fn save_config(config: &ChatConfig) -> Result<()> {
    let config_path = get_config_path()?;
    let file = File::create(&config_path)
        .with_context(|| format!("creating {}", config_path.display()))?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn load_config_file() -> Result<Option<ChatConfig>> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: ChatConfig = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    Ok(Some(config))
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Pin the config file location. Only the first call takes effect.
pub fn set_config_path_override(path: PathBuf) -> bool {
    CONFIG_PATH_OVERRIDE.set(path).is_ok()
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}
