use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub assistant: Assistant,
	pub conversation: Conversation,
	pub retrieval: Retrieval,
	#[serde(default)]
	pub maintenance: Maintenance,
	#[serde(default)]
	pub telemetry: Telemetry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	/// Attempts made when establishing (or re-establishing) the pool before giving up.
	#[serde(default = "default_connect_attempts")]
	pub connect_attempts: u32,
	#[serde(default = "default_connect_backoff_ms")]
	pub connect_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Chat-completions endpoint shared by the context classifier and answer generation.
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assistant {
	/// System prompt describing what the assistant is for.
	pub purpose: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
	pub max_history_length: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retrieval {
	pub num_candidates: u32,
	pub limit: u32,
	#[serde(default = "default_approx_token_cost")]
	pub approx_token_cost: u32,
	#[serde(default)]
	pub failure_policy: RetrievalFailurePolicy,
}

/// What an answer does when similarity search or fragment hydration fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
	/// Give up with the failure payload.
	#[default]
	FailClosed,
	/// Answer as if no context was found.
	FailOpen,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Maintenance {
	pub sleep_interval_secs: u64,
}
impl Default for Maintenance {
	fn default() -> Self {
		Self { sleep_interval_secs: 60 * 60 * 24 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Telemetry {
	pub flush_interval_secs: u64,
	pub max_buffered_spans: u32,
}
impl Default for Telemetry {
	fn default() -> Self {
		Self { flush_interval_secs: 60, max_buffered_spans: 10_000 }
	}
}

fn default_connect_attempts() -> u32 {
	3
}

fn default_connect_backoff_ms() -> u64 {
	500
}

fn default_approx_token_cost() -> u32 {
	100
}
