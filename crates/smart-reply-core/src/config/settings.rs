use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Fallback filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: default_log_directory(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// Quiet period before a buffered conversation is flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Debounce extension applied when the owner starts typing/replying
    #[serde(default = "default_owner_pause_ms")]
    pub owner_pause_ms: u64,
    /// Broadcast channel capacity for queue events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Master switch for automatic replies (batches are still consumed)
    #[serde(default = "default_true")]
    pub auto_reply_enabled: bool,
}

impl QueueConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn owner_pause(&self) -> Duration {
        Duration::from_millis(self.owner_pause_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            owner_pause_ms: default_owner_pause_ms(),
            event_capacity: default_event_capacity(),
            auto_reply_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OwnerConfig {
    #[serde(default = "default_true")]
    pub intercept_enabled: bool,
    #[serde(default = "default_owner_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl OwnerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            intercept_enabled: true,
            ttl_secs: default_owner_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_recall_top_k")]
    pub recall_top_k: usize,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// Token budget for merged history handed to the reply model
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_writer_capacity")]
    pub writer_queue_capacity: usize,
    /// Transport history fetched when memory is disabled
    #[serde(default = "default_recent_limit")]
    pub fallback_history_limit: usize,
}

impl MemoryConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recall_top_k: default_recall_top_k(),
            recent_limit: default_recent_limit(),
            max_history_tokens: default_max_history_tokens(),
            retention_days: default_retention_days(),
            prune_interval_secs: default_prune_interval_secs(),
            writer_queue_capacity: default_writer_capacity(),
            fallback_history_limit: default_recent_limit(),
        }
    }
}

/// Product edition; decides which capabilities exist at all.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Basic,
    #[default]
    Pro,
}

impl Edition {
    pub fn includes_memory(&self) -> bool {
        matches!(self, Self::Pro)
    }

    pub fn includes_owner_intercept(&self) -> bool {
        true
    }

    pub fn includes_multimodal(&self) -> bool {
        matches!(self, Self::Pro)
    }
}

/// Per-edition feature toggles. `None` falls back to the edition default.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FeatureConfig {
    #[serde(default)]
    pub edition: Edition,
    #[serde(default)]
    pub memory: Option<bool>,
    #[serde(default)]
    pub owner_intercept: Option<bool>,
    #[serde(default)]
    pub multimodal: Option<bool>,
}

impl FeatureConfig {
    pub fn memory_available(&self) -> bool {
        self.memory.unwrap_or_else(|| self.edition.includes_memory())
    }

    pub fn owner_intercept_available(&self) -> bool {
        self.owner_intercept
            .unwrap_or_else(|| self.edition.includes_owner_intercept())
    }

    pub fn multimodal_available(&self) -> bool {
        self.multimodal
            .unwrap_or_else(|| self.edition.includes_multimodal())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub ignore_groups: bool,
    #[serde(default = "default_true")]
    pub ignore_broadcasts: bool,
    #[serde(default = "default_true")]
    pub ignore_status: bool,
    #[serde(default = "default_true")]
    pub ignore_system: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ignore_groups: true,
            ignore_broadcasts: true,
            ignore_status: true,
            ignore_system: true,
        }
    }
}

/// One provider endpoint in a failover chain (hosted gateway first, local last)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the default request path of the capability
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub providers: Vec<EndpointConfig>,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub providers: Vec<EndpointConfig>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Vision-capable endpoint used to describe inbound media
    #[serde(default)]
    pub vision: Option<EndpointConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransportConfig {
    pub gateway_url: String,
    /// Gateway instance the business number is connected through
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// HMAC-SHA256 secret for inbound webhook payloads
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
    #[serde(default)]
    pub style_context: Option<String>,
    pub collaborative_instruction: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: crate::services::conversation::PromptBuilder::default_base_instruction(),
            style_context: None,
            collaborative_instruction:
                crate::services::conversation::PromptBuilder::default_collaborative_instruction(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PricingConfig {
    /// Estimated cost of one reply-model call, used for the cost-saved metric
    #[serde(default = "default_unit_cost")]
    pub unit_cost: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            unit_cost: default_unit_cost(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_log_directory() -> String {
    "logs".to_string()
}
fn default_log_level() -> String {
    "info,smart_reply_core=debug".to_string()
}
fn default_debounce_ms() -> u64 {
    10_000
}
fn default_owner_pause_ms() -> u64 {
    15_000
}
fn default_event_capacity() -> usize {
    256
}
fn default_owner_ttl_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_recall_top_k() -> usize {
    5
}
fn default_recent_limit() -> usize {
    10
}
fn default_max_history_tokens() -> usize {
    3_000
}
fn default_retention_days() -> u32 {
    90
}
fn default_prune_interval_secs() -> u64 {
    6 * 60 * 60
}
fn default_writer_capacity() -> usize {
    1_024
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_max_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_instance_name() -> String {
    "default".to_string()
}
fn default_unit_cost() -> f64 {
    0.002
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from("config/settings.toml")
    }

    /// Memory is active only when the edition allows it and it is switched on.
    pub fn memory_active(&self) -> bool {
        self.features.memory_available() && self.memory.enabled
    }

    pub fn owner_intercept_active(&self) -> bool {
        self.features.owner_intercept_available() && self.owner.intercept_enabled
    }

    pub fn multimodal_active(&self) -> bool {
        self.features.multimodal_available() && self.llm.vision.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080

        [embedding]
        providers = [{ name = "local", base_url = "http://localhost:8081" }]

        [llm]
        providers = [{ name = "local", base_url = "http://localhost:8082" }]

        [transport]
        gateway_url = "http://localhost:9000"
    "#;

    #[test]
    fn test_defaults_fill_core_tunables() {
        let settings = parse(MINIMAL);
        assert_eq!(settings.queue.debounce_ms, 10_000);
        assert_eq!(settings.owner.ttl_secs, 300);
        assert_eq!(settings.owner.sweep_interval_secs, 60);
        assert!(settings.database.is_none());
        assert!(settings.memory_active());
        assert!(settings.owner_intercept_active());
        // no vision endpoint configured
        assert!(!settings.multimodal_active());
    }

    #[test]
    fn test_basic_edition_gates_memory() {
        let toml = format!("{}\n[features]\nedition = \"basic\"\n", MINIMAL);
        let settings = parse(&toml);
        assert!(!settings.memory_active());
        assert!(settings.owner_intercept_active());
    }

    #[test]
    fn test_explicit_toggle_overrides_edition() {
        let toml = format!(
            "{}\n[features]\nedition = \"basic\"\nmemory = true\n\n[memory]\nenabled = false\n",
            MINIMAL
        );
        let settings = parse(&toml);
        assert!(settings.features.memory_available());
        // the section switch still wins
        assert!(!settings.memory_active());
    }
}
