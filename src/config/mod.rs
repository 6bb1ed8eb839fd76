use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "DOOR_CONSOLE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost:8443".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub keep_alive_ms: u64,
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: 30_000,
            response_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Start with default config
        let mut config = Self::default();
        let config_path = active_config_path();

        // Load from file if it exists
        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_config) = toml::from_str::<Config>(&raw) {
                config = file_config;
            }
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Server settings
        if let Ok(val) = env::var(format!("{}SERVER_URL", ENV_PREFIX)) {
            self.server.url = val;
        }
        if let Ok(val) = env::var(format!("{}SERVER_TOKEN", ENV_PREFIX)) {
            self.server.token = Some(val);
        }

        // Session timing
        if let Ok(val) = env::var(format!("{}KEEP_ALIVE_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.keep_alive_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}RESPONSE_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.response_timeout_ms = ms;
            }
        }
        if let Ok(val) = env::var(format!("{}CONNECT_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.session.connect_timeout_ms = ms;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = self.server.url.trim();
        if url.is_empty() {
            return Err("server.url must be set".into());
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err("server.url must start with ws:// or wss://".into());
        }
        if self.session.keep_alive_ms == 0 {
            return Err("session.keep_alive_ms must be non-zero".into());
        }
        if self.session.response_timeout_ms == 0 {
            return Err("session.response_timeout_ms must be non-zero".into());
        }
        if self.session.connect_timeout_ms == 0 {
            return Err("session.connect_timeout_ms must be non-zero".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join(".config")
        .join("door-console")
        .join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
