// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::bindings::DEFAULT_BINDING_TTL;
use crate::relay::Reactions;
use crate::retry::RetryPolicy;
use crate::worker::WorkerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: "openai", "mock"
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
}

// Custom Debug impl to redact sensitive fields
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("backend_type", &self.backend_type)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("presence_penalty", &self.presence_penalty)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("max_history", &self.max_history)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reauth_cooldown_ms")]
    pub reauth_cooldown_ms: u64,
    #[serde(default = "default_response_queue")]
    pub response_queue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    #[serde(default = "default_bot_user_id")]
    pub bot_user_id: String,
    #[serde(default)]
    pub reactions: ReactionsConfig,
    /// 0 disables durable thread bindings
    #[serde(default = "default_binding_ttl_secs")]
    pub binding_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionsConfig {
    #[serde(default = "default_reaction_loading")]
    pub loading: String,
    #[serde(default = "default_reaction_success")]
    pub success: String,
    #[serde(default = "default_reaction_failed")]
    pub failed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// host:port for the Prometheus exporter; unset disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; unset logs to stderr only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_backend_type() -> String {
    "openai".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_reauth_cooldown_ms() -> u64 {
    10_000
}

fn default_response_queue() -> String {
    crate::queue::answers_queue("console")
}

fn default_bot_user_id() -> String {
    "promptq".to_string()
}

fn default_binding_ttl_secs() -> u64 {
    DEFAULT_BINDING_TTL.as_secs()
}

fn default_reaction_loading() -> String {
    "thinking_face".to_string()
}

fn default_reaction_success() -> String {
    "white_check_mark".to_string()
}

fn default_reaction_failed() -> String {
    "x".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            api_key: None,
            base_url: None,
            model: None,
            temperature: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            max_history: None,
            max_messages: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reauth_cooldown_ms: default_reauth_cooldown_ms(),
            response_queue: default_response_queue(),
        }
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            bot_user_id: default_bot_user_id(),
            reactions: ReactionsConfig::default(),
            binding_ttl_secs: default_binding_ttl_secs(),
        }
    }
}

impl Default for ReactionsConfig {
    fn default() -> Self {
        Self {
            loading: default_reaction_loading(),
            success: default_reaction_success(),
            failed: default_reaction_failed(),
        }
    }
}

impl BackendConfig {
    /// Backend section as the JSON value handed to registry factories
    pub fn to_json_value(&self) -> serde_json::Value {
        let mut value = serde_json::json!({});
        let put = |v: &mut serde_json::Value, key: &str, field: serde_json::Value| {
            if !field.is_null() {
                v[key] = field;
            }
        };
        put(&mut value, "api_key", serde_json::json!(self.api_key));
        put(&mut value, "base_url", serde_json::json!(self.base_url));
        put(&mut value, "model", serde_json::json!(self.model));
        put(&mut value, "temperature", serde_json::json!(self.temperature));
        put(&mut value, "top_p", serde_json::json!(self.top_p));
        put(&mut value, "presence_penalty", serde_json::json!(self.presence_penalty));
        put(&mut value, "frequency_penalty", serde_json::json!(self.frequency_penalty));
        put(&mut value, "max_history", serde_json::json!(self.max_history));
        put(&mut value, "max_messages", serde_json::json!(self.max_messages));
        value
    }

    /// The credential a worker identity is derived from
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval(),
            retry: RetryPolicy {
                request_timeout: Duration::from_millis(self.request_timeout_ms),
                reauth_cooldown: Duration::from_millis(self.reauth_cooldown_ms),
            },
        }
    }
}

impl FrontendConfig {
    pub fn reactions(&self) -> Reactions {
        Reactions {
            loading: self.reactions.loading.clone(),
            success: self.reactions.success.clone(),
            failed: self.reactions.failed.clone(),
        }
    }

    pub fn binding_ttl(&self) -> Duration {
        Duration::from_secs(self.binding_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid number, got: {}", name, val))
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. PROMPTQ_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/promptq/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("PROMPTQ_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = directories::ProjectDirs::from("", "", "promptq")
            .map(|dirs| dirs.config_dir().join("config.toml"))?;
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Override fields from environment variables if present
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.store.url = val;
        }
        if let Ok(val) = std::env::var("BACKEND_TYPE") {
            self.backend.backend_type = val;
        }
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OPENAI_BASE_URL") {
            self.backend.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("OPENAI_MODEL") {
            self.backend.model = Some(val);
        }
        if let Ok(val) = std::env::var("POLL_INTERVAL_MS") {
            self.dispatch.poll_interval_ms = parse_env("POLL_INTERVAL_MS", &val)?;
        }
        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_MS") {
            self.dispatch.request_timeout_ms = parse_env("REQUEST_TIMEOUT_MS", &val)?;
        }
        if let Ok(val) = std::env::var("REAUTH_COOLDOWN_MS") {
            self.dispatch.reauth_cooldown_ms = parse_env("REAUTH_COOLDOWN_MS", &val)?;
        }
        if let Ok(val) = std::env::var("RESPONSE_QUEUE_NAME") {
            self.dispatch.response_queue = val;
        }
        if let Ok(val) = std::env::var("BOT_USER_ID") {
            self.frontend.bot_user_id = val;
        }
        if let Ok(val) = std::env::var("REACTION_LOADING") {
            self.frontend.reactions.loading = val;
        }
        if let Ok(val) = std::env::var("REACTION_SUCCESS") {
            self.frontend.reactions.success = val;
        }
        if let Ok(val) = std::env::var("REACTION_FAILED") {
            self.frontend.reactions.failed = val;
        }
        if let Ok(val) = std::env::var("BINDING_TTL_SECS") {
            self.frontend.binding_ttl_secs = parse_env("BINDING_TTL_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("METRICS_LISTEN") {
            self.metrics.listen = Some(val);
        }
        if let Ok(val) = std::env::var("LOG_DIR") {
            self.logging.dir = Some(val);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.store.url.trim();
        if !(url.starts_with("redis://") || url.starts_with("rediss://") || url.starts_with("memory://")) {
            anyhow::bail!(
                "store.url must start with redis://, rediss:// or memory:// (got '{}')",
                self.store.url
            );
        }
        if self.dispatch.poll_interval_ms == 0 {
            anyhow::bail!("dispatch.poll_interval_ms must be greater than 0");
        }
        if self.dispatch.request_timeout_ms == 0 {
            anyhow::bail!("dispatch.request_timeout_ms must be greater than 0");
        }
        if self.dispatch.response_queue.trim().is_empty() {
            anyhow::bail!("dispatch.response_queue must not be empty");
        }
        if self.backend.backend_type == "openai" && self.backend.credential().is_none() {
            anyhow::bail!(
                "backend.api_key is required for the openai backend (set in config.toml or OPENAI_API_KEY env var)"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.dispatch.poll_interval_ms, 1000);
        assert_eq!(config.dispatch.request_timeout_ms, 300_000);
        assert_eq!(config.dispatch.reauth_cooldown_ms, 10_000);
        assert_eq!(config.dispatch.response_queue, "queue.answers.console");
        assert_eq!(config.frontend.binding_ttl_secs, 86_400);
        assert_eq!(config.frontend.reactions.loading, "thinking_face");
    }

    #[test]
    fn test_worker_config_conversion() {
        let config = Config::from_toml(
            r#"
[dispatch]
poll_interval_ms = 250
request_timeout_ms = 2000
reauth_cooldown_ms = 0
"#,
        )
        .unwrap();
        let worker = config.dispatch.worker_config();
        assert_eq!(worker.poll_interval, Duration::from_millis(250));
        assert_eq!(worker.retry.request_timeout, Duration::from_secs(2));
        assert_eq!(worker.retry.reauth_cooldown, Duration::ZERO);
    }

    #[test]
    fn test_backend_json_skips_unset_fields() {
        let backend = BackendConfig {
            api_key: Some("sk-1".to_string()),
            temperature: Some(0.5),
            max_messages: Some(50),
            ..Default::default()
        };
        let value = backend.to_json_value();
        assert_eq!(value["api_key"], "sk-1");
        assert_eq!(value["temperature"], 0.5);
        assert_eq!(value["max_messages"], 50);
        assert!(value.get("model").is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.backend.api_key = Some("sk".to_string());
        assert!(config.validate().is_ok());

        config.store.url = "http://nope".to_string();
        assert!(config.validate().is_err());
        config.store.url = "memory://".to_string();

        config.dispatch.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.dispatch.poll_interval_ms = 10;

        config.backend.api_key = Some("   ".to_string());
        assert!(config.validate().is_err());
        config.backend.backend_type = "mock".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = BackendConfig {
            api_key: Some("sk-very-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("sk-very-secret"));
    }
}
