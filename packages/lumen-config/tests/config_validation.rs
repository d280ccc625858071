use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use lumen_config::{Config, Error, RetrievalFailurePolicy};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let table = root.as_table_mut().expect("Template config must be a table.");
	let mut current = table;

	for part in section.split('.') {
		current = current
			.get_mut(part)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{section}]."));
	}

	current.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("lumen_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

fn load_err(payload: String) -> Error {
	let path = write_temp_config(payload);
	let result = lumen_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result.expect_err("Expected a validation error.")
}

#[test]
fn sample_config_loads() {
	let path = write_temp_config(SAMPLE_CONFIG_TEMPLATE_TOML.to_string());
	let result = lumen_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Sample config must be valid.");

	assert_eq!(cfg.conversation.max_history_length, 10);
	assert_eq!(cfg.retrieval.num_candidates, 100);
	assert_eq!(cfg.retrieval.limit, 5);
	assert_eq!(cfg.retrieval.failure_policy, RetrievalFailurePolicy::FailClosed);
}

#[test]
fn optional_sections_fall_back_to_defaults() {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let table = root.as_table_mut().expect("Template config must be a table.");

	table.remove("maintenance");
	table.remove("telemetry");

	let retrieval = table
		.get_mut("retrieval")
		.and_then(Value::as_table_mut)
		.expect("Template config must include [retrieval].");

	retrieval.remove("approx_token_cost");
	retrieval.remove("failure_policy");

	let cfg: Config = toml::from_str(&toml::to_string(&root).expect("Failed to render config."))
		.expect("Failed to parse config without optional sections.");

	assert_eq!(cfg.maintenance.sleep_interval_secs, 86_400);
	assert_eq!(cfg.telemetry.flush_interval_secs, 60);
	assert_eq!(cfg.retrieval.approx_token_cost, 100);
	assert_eq!(cfg.retrieval.failure_policy, RetrievalFailurePolicy::FailClosed);
	assert_eq!(cfg.storage.postgres.connect_attempts, 3);
	assert!(lumen_config::validate(&cfg).is_ok());
}

#[test]
fn num_candidates_must_cover_limit() {
	let err = load_err(sample_toml_with("retrieval", "num_candidates", Value::Integer(2)));

	assert!(
		err.to_string().contains("retrieval.num_candidates must be at least retrieval.limit."),
		"Unexpected error: {err}"
	);
}

#[test]
fn max_history_length_must_be_positive() {
	let err = load_err(sample_toml_with("conversation", "max_history_length", Value::Integer(0)));

	assert!(
		err.to_string().contains("conversation.max_history_length must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn failure_policy_accepts_only_known_values() {
	let path = write_temp_config(sample_toml_with(
		"retrieval",
		"failure_policy",
		Value::String("fail_open".to_string()),
	));
	let result = lumen_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("fail_open must be accepted.");

	assert_eq!(cfg.retrieval.failure_policy, RetrievalFailurePolicy::FailOpen);

	let err = load_err(sample_toml_with(
		"retrieval",
		"failure_policy",
		Value::String("retry".to_string()),
	));

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err}");
}

#[test]
fn embedding_dimensions_must_match_vector_dim() {
	let mut cfg = base_config();

	cfg.storage.qdrant.vector_dim = 768;

	let err = lumen_config::validate(&cfg).expect_err("Expected dimension mismatch error.");

	assert!(
		err.to_string()
			.contains("providers.embedding.dimensions must match storage.qdrant.vector_dim."),
		"Unexpected error: {err}"
	);
}

#[test]
fn provider_keys_must_be_present() {
	let mut cfg = base_config();

	cfg.providers.llm.api_key = "  ".to_string();

	let err = lumen_config::validate(&cfg).expect_err("Expected api_key validation error.");

	assert!(err.to_string().contains("Provider llm api_key must be non-empty."));
}

#[test]
fn missing_file_reports_path() {
	let mut path = env::temp_dir();

	path.push("lumen_config_test_missing.toml");

	let err = lumen_config::load(&path).expect_err("Expected a read error.");

	assert!(matches!(err, Error::ReadConfig { .. }));
}
