//! Configuration
//!
//! Everything has a default; a TOML file can override any field. The Flipside
//! API key only ever comes from the environment (or a `.env` file).

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const API_KEY_VARS: [&str; 2] = ["FLIPSIDE_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub flipside: FlipsideConfig,
}

/// Which chain tables the on-chain query reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Flipside database holding `core.ez_token_transfers` & co.
    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,

    /// Only events after this date are considered
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Shortest hash fragment (hex digits) allowed into the query
    #[serde(default = "default_min_fragment_hex")]
    pub min_fragment_hex: usize,
}

fn default_schema() -> String {
    "avalanche".to_string()
}

fn default_native_symbol() -> String {
    "AVAX".to_string()
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 1).unwrap_or_default()
}

fn default_min_fragment_hex() -> usize {
    8
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            native_symbol: default_native_symbol(),
            start_date: default_start_date(),
            min_fragment_hex: default_min_fragment_hex(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipsideConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(skip)]
    pub api_key: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Status polls before giving up on a query run
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_result_ttl_hours")]
    pub result_ttl_hours: u32,

    /// 0 forces a fresh run instead of a cached result
    #[serde(default)]
    pub max_age_minutes: u32,
}

fn default_base_url() -> String {
    "https://api-v2.flipsidecrypto.xyz".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_polls() -> u32 {
    1_200
}

fn default_page_size() -> u32 {
    100_000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_result_ttl_hours() -> u32 {
    1
}

impl Default for FlipsideConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            result_ttl_hours: default_result_ttl_hours(),
            max_age_minutes: 0,
        }
    }
}

impl FlipsideConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            anyhow!(
                "Flipside API key not set (export {} or add it to .env)",
                API_KEY_VARS[0]
            )
        })
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Optional TOML file plus the API key from the environment
    pub fn resolve(path: Option<&Path>, api_key: Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.flipside.api_key = api_key.or_else(api_key_from_env);
        Ok(config)
    }

    /// Schema and symbol end up inside SQL text
    pub fn validate(&self) -> Result<()> {
        let schema_ok = !self.chain.schema.is_empty()
            && self
                .chain
                .schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !schema_ok {
            return Err(anyhow!("invalid chain schema '{}'", self.chain.schema));
        }

        let symbol_ok = !self.chain.native_symbol.is_empty()
            && self.chain.native_symbol.chars().all(|c| c.is_ascii_alphanumeric());
        if !symbol_ok {
            return Err(anyhow!(
                "invalid native symbol '{}'",
                self.chain.native_symbol
            ));
        }

        if self.flipside.page_size == 0 || self.flipside.max_polls == 0 {
            return Err(anyhow!("flipside page_size and max_polls must be positive"));
        }

        Ok(())
    }
}

fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chain.schema, "avalanche");
        assert_eq!(config.chain.native_symbol, "AVAX");
        assert_eq!(
            config.chain.start_date,
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
        );
        assert_eq!(config.flipside.base_url, "https://api-v2.flipsidecrypto.xyz");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chain]").unwrap();
        writeln!(file, "schema = \"ethereum\"").unwrap();
        writeln!(file, "native_symbol = \"ETH\"").unwrap();
        writeln!(file, "start_date = \"2024-01-15\"").unwrap();
        writeln!(file, "[flipside]").unwrap();
        writeln!(file, "poll_interval_ms = 250").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.chain.schema, "ethereum");
        assert_eq!(config.chain.native_symbol, "ETH");
        assert_eq!(
            config.chain.start_date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(config.chain.min_fragment_hex, 8);
        assert_eq!(config.flipside.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.flipside.page_size, 100_000);
    }

    #[test]
    fn test_rejects_schema_that_could_escape_sql() {
        let mut config = Config::default();
        config.chain.schema = "avalanche; drop table x".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chain.native_symbol = "AVAX'".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = Config::resolve(None, Some("secret".to_string())).unwrap();
        assert_eq!(config.flipside.require_api_key().unwrap(), "secret");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let flipside = FlipsideConfig::default();
        assert!(flipside.require_api_key().is_err());
    }
}
