mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Assistant, Config, Conversation, EmbeddingProviderConfig, LlmProviderConfig, Maintenance,
	Postgres, Providers, Qdrant, Retrieval, RetrievalFailurePolicy, Service, Storage, Telemetry,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.postgres.connect_attempts == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.connect_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if !cfg.providers.llm.temperature.is_finite() || cfg.providers.llm.temperature < 0.0 {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be a finite number of zero or greater."
				.to_string(),
		});
	}

	for (label, key) in
		[("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)]
	{
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	if cfg.assistant.purpose.trim().is_empty() {
		return Err(Error::Validation {
			message: "assistant.purpose must be non-empty.".to_string(),
		});
	}
	if cfg.conversation.max_history_length == 0 {
		return Err(Error::Validation {
			message: "conversation.max_history_length must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.limit == 0 {
		return Err(Error::Validation {
			message: "retrieval.limit must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.num_candidates < cfg.retrieval.limit {
		return Err(Error::Validation {
			message: "retrieval.num_candidates must be at least retrieval.limit.".to_string(),
		});
	}
	if cfg.maintenance.sleep_interval_secs == 0 {
		return Err(Error::Validation {
			message: "maintenance.sleep_interval_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.telemetry.flush_interval_secs == 0 {
		return Err(Error::Validation {
			message: "telemetry.flush_interval_secs must be greater than zero.".to_string(),
		});
	}
	if cfg.telemetry.max_buffered_spans == 0 {
		return Err(Error::Validation {
			message: "telemetry.max_buffered_spans must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.providers.embedding.api_base.ends_with('/') && cfg.providers.embedding.path.starts_with('/')
	{
		cfg.providers.embedding.api_base.pop();
	}
	if cfg.providers.llm.api_base.ends_with('/') && cfg.providers.llm.path.starts_with('/') {
		cfg.providers.llm.api_base.pop();
	}
}
