//! Configuration - `stockpilot.toml` の読み込み
//!
//! Every field has a default, so an empty (or missing) file is a valid config.
//!
//! ```toml
//! data_dir = "data/tasks"
//! poll_interval_ms = 1000
//! default_provider = "deepseek"
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 2000
//!
//! [providers.deepseek]
//! kind = "openai_compatible"
//! base_url = "https://api.deepseek.com/v1/chat/completions"
//! model = "deepseek-chat"
//! api_key_env = "DEEPSEEK_API_KEY"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StockpilotConfig {
    /// Root directory of the file-backed task store.
    pub data_dir: PathBuf,

    /// Pause / stop poll granularity, which bounds cancellation latency.
    pub poll_interval_ms: u64,

    /// Provider used when a request does not name one.
    pub default_provider: String,

    /// Overrides the built-in analysis prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    pub retry: RetryConfig,

    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for StockpilotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/tasks"),
            poll_interval_ms: 1000,
            default_provider: "deepseek".to_string(),
            prompt_template: None,
            retry: RetryConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl StockpilotConfig {
    /// Load config from disk, or return the default if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    /// Fixed seed for reproducible jitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat-completions endpoint.
    OpenaiCompatible,
    /// Deterministic fake, for demos and tests.
    Scripted,
}

/// `[providers.<name>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the key, used when `api_key` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,

    // scripted only
    pub fail_first: u32,
    pub fail_kind: ErrorKind,
    pub latency_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenaiCompatible,
            base_url: None,
            model: String::new(),
            api_key: None,
            api_key_env: None,
            max_tokens: 15000,
            temperature: 0.7,
            timeout_secs: 60,
            fail_first: 0,
            fail_kind: ErrorKind::Network,
            latency_ms: 0,
        }
    }
}

impl ProviderConfig {
    /// `api_key`, or the value of `api_key_env`. Empty strings count as unset.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Some(key.to_string());
        }
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: StockpilotConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.providers.is_empty());
    }

    #[test]
    fn parses_providers_and_partial_retry_section() {
        let text = r#"
            poll_interval_ms = 250
            default_provider = "qwen"

            [retry]
            max_retries = 5
            seed = 42

            [providers.qwen]
            base_url = "https://dashscope.example/v1/chat/completions"
            model = "qwen-plus"
            api_key = "sk-test"
            temperature = 0.2

            [providers.fake]
            kind = "scripted"
            fail_first = 2
            fail_kind = "rate_limit"
        "#;
        let config: StockpilotConfig = toml::from_str(text).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.seed, Some(42));

        let qwen = &config.providers["qwen"];
        assert_eq!(qwen.kind, ProviderKind::OpenaiCompatible);
        assert_eq!(qwen.max_tokens, 15000);
        assert_eq!(qwen.resolve_api_key().as_deref(), Some("sk-test"));

        let fake = &config.providers["fake"];
        assert_eq!(fake.kind, ProviderKind::Scripted);
        assert_eq!(fake.fail_first, 2);
        assert_eq!(fake.fail_kind, ErrorKind::RateLimit);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let provider = ProviderConfig {
            api_key: Some("  ".to_string()),
            api_key_env: Some("STOCKPILOT_TEST_KEY_THAT_IS_NOT_SET".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.resolve_api_key(), None);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = StockpilotConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.default_provider, "deepseek");
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = \"soon\"").unwrap();
        let err = StockpilotConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
