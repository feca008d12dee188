use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_PRICE_TTL_SECONDS: u64 = 15;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: DEFAULT_YAHOO_BASE_URL.to_string(),
            }),
        }
    }
}

fn default_ttl() -> u64 {
    DEFAULT_PRICE_TTL_SECONDS
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Root directory holding `index.json` and the week bucket directories.
    pub data_path: Option<String>,
    #[serde(default = "default_ttl")]
    pub price_ttl_seconds: u64,
    /// Compact JSON output for bucket and index files.
    #[serde(default = "default_true")]
    pub fast_json: bool,
    /// Attach ETag and Cache-Control headers to list responses.
    #[serde(default = "default_true")]
    pub http_cache: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_path: None,
            price_ttl_seconds: DEFAULT_PRICE_TTL_SECONDS,
            fast_json: true,
            http_cache: true,
            listen_addr: default_listen_addr(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, or built-in defaults when it does not
    /// exist yet. Environment overrides are applied on top.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "stockwatch", "stockwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "stockwatch", "stockwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.price_ttl_seconds = config.price_ttl_seconds.max(1);
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Applies `STOCKS_PATH`, `PRICE_TTL_SECONDS`, `USE_FAST_JSON` and
    /// `ENABLE_HTTP_CACHE` from the given variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = read("STOCKS_PATH") {
            self.data_path = Some(path);
        }
        if let Some(ttl) = read("PRICE_TTL_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
            self.price_ttl_seconds = ttl;
        }
        self.price_ttl_seconds = self.price_ttl_seconds.max(1);
        if let Some(flag) = read("USE_FAST_JSON") {
            self.fast_json = flag.to_lowercase() != "false";
        }
        if let Some(flag) = read("ENABLE_HTTP_CACHE") {
            self.http_cache = !matches!(flag.to_lowercase().as_str(), "0" | "false" | "no");
        }
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_seconds.max(1))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_addr))
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or(DEFAULT_YAHOO_BASE_URL, |p| p.base_url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
data_path: "/srv/stocks"
price_ttl_seconds: 30
fast_json: false
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.data_path.as_deref(), Some("/srv/stocks"));
        assert_eq!(config.price_ttl_seconds, 30);
        assert!(!config.fast_json);
        assert!(config.http_cache);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.yahoo_base_url(), "http://example.com/yahoo");
    }

    #[test]
    fn test_config_defaults_from_empty_document() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.data_path.is_none());
        assert_eq!(config.price_ttl(), Duration::from_secs(15));
        assert!(config.fast_json);
        assert_eq!(config.yahoo_base_url(), DEFAULT_YAHOO_BASE_URL);
        assert!(config.listen_addr().is_ok());
    }

    #[test]
    fn test_load_from_path_clamps_ttl() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "price_ttl_seconds: 0\n").unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.price_ttl_seconds, 1);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STOCKS_PATH", "/tmp/stocks"),
            ("PRICE_TTL_SECONDS", "42"),
            ("USE_FAST_JSON", "FALSE"),
            ("ENABLE_HTTP_CACHE", "no"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.data_path.as_deref(), Some("/tmp/stocks"));
        assert_eq!(config.price_ttl_seconds, 42);
        assert!(!config.fast_json);
        assert!(!config.http_cache);
    }

    #[test]
    fn test_env_overrides_ignore_bad_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PRICE_TTL_SECONDS", "soon"), ("ENABLE_HTTP_CACHE", "yes")]);
        let mut config = AppConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.price_ttl_seconds, DEFAULT_PRICE_TTL_SECONDS);
        assert!(config.http_cache);

        let mut config = AppConfig::default();
        config.apply_overrides(|name| (name == "PRICE_TTL_SECONDS").then(|| "0".to_string()));
        assert_eq!(config.price_ttl_seconds, 1);
    }
}
