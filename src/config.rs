//! Configuration management for the dexpulse engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::topics::Topic;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub backend: BackendConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    /// Per-topic cadence overrides, keyed by topic name
    #[serde(default)]
    pub topics: HashMap<String, TopicPollConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    /// Shared ticker period for the transaction monitor
    #[serde(default = "defaults::tx_poll_interval_ms")]
    pub tx_poll_interval_ms: u64,
    /// Status checks before a still-pending transaction times out
    #[serde(default = "defaults::tx_max_polls")]
    pub tx_max_polls: u32,
    #[serde(default = "defaults::event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Whether the engine starts in the hidden (background) state
    #[serde(default)]
    pub start_hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Cadence and freshness settings for one topic's poller
#[derive(Debug, Clone, Deserialize)]
pub struct TopicPollConfig {
    #[serde(default = "defaults::active_interval_ms")]
    pub active_interval_ms: u64,
    #[serde(default = "defaults::background_interval_ms")]
    pub background_interval_ms: u64,
    #[serde(default)]
    pub pause_on_hidden: bool,
    #[serde(default = "defaults::ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for TopicPollConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: defaults::active_interval_ms(),
            background_interval_ms: defaults::background_interval_ms(),
            pause_on_hidden: false,
            ttl_ms: defaults::ttl_ms(),
        }
    }
}

mod defaults {
    pub fn tx_poll_interval_ms() -> u64 {
        10_000
    }
    pub fn tx_max_polls() -> u32 {
        120
    }
    pub fn event_bus_capacity() -> usize {
        1024
    }
    pub fn request_timeout_ms() -> u64 {
        15_000
    }
    pub fn active_interval_ms() -> u64 {
        30_000
    }
    pub fn background_interval_ms() -> u64 {
        90_000
    }
    pub fn ttl_ms() -> u64 {
        10_000
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("DEXPULSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.backend.base_url.is_empty() {
            anyhow::bail!("backend.base_url must be set");
        }

        if self.engine.tx_poll_interval_ms == 0 {
            anyhow::bail!("engine.tx_poll_interval_ms must be positive");
        }
        if self.engine.tx_max_polls == 0 {
            anyhow::bail!("engine.tx_max_polls must be positive");
        }

        for (name, topic) in &self.topics {
            if name.parse::<Topic>().is_err() {
                anyhow::bail!("Unknown topic in [topics]: {}", name);
            }
            if topic.active_interval_ms == 0 || topic.background_interval_ms == 0 {
                anyhow::bail!("Topic {} has a zero polling interval", name);
            }
        }

        Ok(())
    }

    /// Poll configuration for a topic, falling back to defaults
    pub fn topic_poll(&self, topic: Topic) -> TopicPollConfig {
        self.topics
            .get(topic.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Full cadence map for the registry
    pub fn topic_cadences(&self) -> HashMap<Topic, TopicPollConfig> {
        Topic::all()
            .into_iter()
            .map(|t| (t, self.topic_poll(t)))
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [engine]
        instance_id = "dexpulse-test"

        [backend]
        base_url = "https://indexer.example.com"

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090

        [topics.tokens]
        active_interval_ms = 15000
        pause_on_hidden = true
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(
            result,
            "url = \"https://api.example.com/test_value/endpoint\""
        );
    }

    #[test]
    fn parses_sample_config_with_defaults() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.engine.tx_poll_interval_ms, 10_000);
        assert_eq!(settings.engine.tx_max_polls, 120);

        let tokens = settings.topic_poll(Topic::Tokens);
        assert_eq!(tokens.active_interval_ms, 15_000);
        assert!(tokens.pause_on_hidden);
        assert_eq!(tokens.background_interval_ms, 90_000);

        // Unconfigured topics fall back entirely to defaults
        let pools = settings.topic_poll(Topic::Pools);
        assert_eq!(pools.active_interval_ms, 30_000);
        assert!(!pools.pause_on_hidden);
    }

    #[test]
    fn loads_from_file_pointed_at_by_env() {
        env::set_var("DEXPULSE_TEST_BACKEND", "https://indexer.test");
        let contents = SAMPLE.replace("https://indexer.example.com", "${DEXPULSE_TEST_BACKEND}");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dexpulse.toml");
        std::fs::write(&path, contents).unwrap();
        env::set_var("DEXPULSE_CONFIG", &path);

        let settings = Settings::load().unwrap();
        assert_eq!(settings.backend.base_url, "https://indexer.test");
    }

    #[test]
    fn rejects_unknown_topic_keys() {
        let bad = SAMPLE.replace("[topics.tokens]", "[topics.tokenz]");
        let settings: Settings = toml::from_str(&bad).unwrap();
        assert!(settings.validate().is_err());
    }
}
