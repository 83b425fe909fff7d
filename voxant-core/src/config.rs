//! Configuration system for Voxant.
//!
//! Uses `figment` for layered configuration: defaults -> `voxant.toml` ->
//! environment. Environment keys nest with `__` under the `VOXANT_` prefix
//! (e.g. `VOXANT_LLM__MODEL`); the conventional unprefixed deployment keys
//! (`LLM_API_KEY`, `DATABASE_URL`, ...) are also recognized as aliases.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the Voxant agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoxantConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub carrier: CarrierConfig,
    pub database: DatabaseConfig,
    pub response_cache: ResponseCacheConfig,
    pub quality: QualityConfig,
    pub agent: AgentPersona,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    /// API key; empty means unauthenticated (local providers).
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per reply. Voice replies are short.
    pub max_tokens: u32,
    /// Use the serial await-full-completion path instead of streaming with
    /// first-sentence TTS overlap.
    pub serial_fallback: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            max_tokens: 150,
            serial_fallback: false,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub model: String,
    pub voice: String,
    pub format: String,
    /// Directory for the content-addressed disk cache.
    pub cache_dir: String,
    /// Entry bound of the in-memory audio LRU.
    pub memory_cache_size: usize,
    /// Hard timeout per synthesis call.
    pub timeout_secs: u64,
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
            cache_dir: "storage/tts".to_string(),
            memory_cache_size: 50,
            timeout_secs: 15,
            speed: 1.0,
        }
    }
}

/// Telephony carrier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Shared secret used to sign webhook requests.
    pub auth_token: String,
    /// Our outbound caller number.
    pub phone_number: String,
    /// Public base URL the carrier fetches audio from and posts webhooks to.
    pub webhook_base_url: String,
    /// Reject webhooks whose signature does not verify.
    pub signature_verification_enabled: bool,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            phone_number: String::new(),
            webhook_base_url: String::new(),
            signature_verification_enabled: true,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 8,
        }
    }
}

/// Response cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 1000,
        }
    }
}

/// Quality scoring thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Expected windowed mean score.
    pub baseline_score: f64,
    /// Alert when the windowed mean drops more than this below baseline.
    pub alert_threshold: f64,
    /// Sliding window length.
    pub window: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            baseline_score: 75.0,
            alert_threshold: 5.0,
            window: 50,
        }
    }
}

/// Identity the agent speaks as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPersona {
    pub agent_name: String,
    pub company_name: String,
}

impl Default for AgentPersona {
    fn default() -> Self {
        Self {
            agent_name: "Ava".to_string(),
            company_name: "Meridian Automation".to_string(),
        }
    }
}

/// Well-known unprefixed environment keys mapped to config paths.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("LLM_BASE_URL", "llm.base_url"),
    ("LLM_API_KEY", "llm.api_key"),
    ("LLM_MODEL", "llm.model"),
    ("TTS_MODEL", "tts.model"),
    ("TTS_VOICE", "tts.voice"),
    ("TTS_CACHE_DIR", "tts.cache_dir"),
    ("TTS_MEMORY_CACHE_SIZE", "tts.memory_cache_size"),
    ("CARRIER_AUTH_TOKEN", "carrier.auth_token"),
    ("CARRIER_PHONE_NUMBER", "carrier.phone_number"),
    ("WEBHOOK_BASE_URL", "carrier.webhook_base_url"),
    ("SIGNATURE_VERIFICATION_ENABLED", "carrier.signature_verification_enabled"),
    ("DATABASE_URL", "database.url"),
    ("RESPONSE_CACHE_TTL_SECONDS", "response_cache.ttl_secs"),
    ("QUALITY_BASELINE_SCORE", "quality.baseline_score"),
    ("QUALITY_ALERT_THRESHOLD", "quality.alert_threshold"),
];

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Unprefixed deployment env keys (`LLM_API_KEY`, `DATABASE_URL`, ...)
/// 2. Prefixed environment variables (`VOXANT_LLM__MODEL`, ...)
/// 3. `voxant.toml` in the working directory (or an explicit path)
/// 4. Built-in defaults
pub fn load_config(config_path: Option<&Path>) -> Result<VoxantConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VoxantConfig::default()));

    let toml_path = config_path.unwrap_or_else(|| Path::new("voxant.toml"));
    if toml_path.exists() {
        figment = figment.merge(Toml::file(toml_path));
    }

    figment = figment.merge(Env::prefixed("VOXANT_").split("__"));

    for (env_key, target) in ENV_ALIASES {
        figment = figment.merge(
            Env::raw()
                .only(&[*env_key])
                .map(|_| (*target).into())
                .split("."),
        );
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VoxantConfig::default();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 150);
        assert!(!config.llm.serial_fallback);
        assert_eq!(config.tts.memory_cache_size, 50);
        assert_eq!(config.tts.timeout_secs, 15);
        assert_eq!(config.response_cache.ttl_secs, 3600);
        assert_eq!(config.quality.baseline_score, 75.0);
        assert_eq!(config.quality.alert_threshold, 5.0);
        assert!(config.carrier.signature_verification_enabled);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = VoxantConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: VoxantConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.tts.voice, config.tts.voice);
        assert_eq!(deserialized.database.url, config.database.url);
    }

    #[test]
    fn test_load_config_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = load_config(None).unwrap();
            assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
            assert_eq!(config.response_cache.max_entries, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_load_config_from_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "voxant.toml",
                r#"
[llm]
model = "qwen2.5:14b"
base_url = "http://localhost:11434/v1"

[tts]
voice = "nova"
"#,
            )?;
            let config = load_config(None).unwrap();
            assert_eq!(config.llm.model, "qwen2.5:14b");
            assert_eq!(config.tts.voice, "nova");
            // Untouched sections keep defaults
            assert_eq!(config.quality.window, 50);
            Ok(())
        });
    }

    #[test]
    fn test_env_alias_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LLM_MODEL", "gpt-4o");
            jail.set_env("RESPONSE_CACHE_TTL_SECONDS", "120");
            jail.set_env("SIGNATURE_VERIFICATION_ENABLED", "false");
            let config = load_config(None).unwrap();
            assert_eq!(config.llm.model, "gpt-4o");
            assert_eq!(config.response_cache.ttl_secs, 120);
            assert!(!config.carrier.signature_verification_enabled);
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("VOXANT_AGENT__AGENT_NAME", "June");
            jail.set_env("VOXANT_DATABASE__MAX_CONNECTIONS", "4");
            let config = load_config(None).unwrap();
            assert_eq!(config.agent.agent_name, "June");
            assert_eq!(config.database.max_connections, 4);
            Ok(())
        });
    }
}
