use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

/// Why a question could not be turned into a usable vector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbeddingFailure {
	#[error("Embedding request failed: {0}")]
	Request(String),
	#[error("Embedding response carried no vector.")]
	Absent,
	#[error("Embedding value at position {position} is not numeric.")]
	NotNumeric { position: usize },
	#[error("Embedding has {actual} dimensions, expected {expected}.")]
	Dimension { expected: usize, actual: usize },
}

/// Embeds one question and checks the vector against `cfg.dimensions`.
pub async fn embed_question(
	cfg: &lumen_config::EmbeddingProviderConfig,
	question: &str,
) -> Result<Vec<f32>, EmbeddingFailure> {
	let json = request(cfg, question)
		.await
		.map_err(|err| EmbeddingFailure::Request(format!("{err:#}")))?;

	question_vector(&json, cfg.dimensions as usize)
}

async fn request(
	cfg: &lumen_config::EmbeddingProviderConfig,
	question: &str,
) -> color_eyre::Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": [question],
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json = res.error_for_status()?.json().await?;

	Ok(json)
}

fn question_vector(json: &Value, expected: usize) -> Result<Vec<f32>, EmbeddingFailure> {
	if let Some(message) = json.get("error").and_then(|err| err.get("message")) {
		return Err(EmbeddingFailure::Request(format!("provider returned an error: {message}")));
	}

	let Some(values) = json
		.get("data")
		.and_then(|data| data.as_array())
		.and_then(|data| data.first())
		.and_then(|item| item.get("embedding"))
		.and_then(|embedding| embedding.as_array())
		.filter(|values| !values.is_empty())
	else {
		return Err(EmbeddingFailure::Absent);
	};
	let mut vector = Vec::with_capacity(values.len());

	for (position, value) in values.iter().enumerate() {
		let number = value.as_f64().ok_or(EmbeddingFailure::NotNumeric { position })?;

		vector.push(number as f32);
	}

	if vector.len() != expected {
		return Err(EmbeddingFailure::Dimension { expected, actual: vector.len() });
	}

	Ok(vector)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn takes_the_first_vector() {
		let json = serde_json::json!({
			"data": [{ "index": 0, "embedding": [0.5, 1.5, 2.0] }],
			"usage": { "total_tokens": 7 }
		});

		assert_eq!(question_vector(&json, 3), Ok(vec![0.5, 1.5, 2.0]));
	}

	#[test]
	fn missing_or_empty_vectors_are_absent() {
		assert_eq!(
			question_vector(&serde_json::json!({ "object": "list" }), 3),
			Err(EmbeddingFailure::Absent)
		);
		assert_eq!(
			question_vector(&serde_json::json!({ "data": [] }), 3),
			Err(EmbeddingFailure::Absent)
		);
		assert_eq!(
			question_vector(&serde_json::json!({ "data": [{ "embedding": [] }] }), 3),
			Err(EmbeddingFailure::Absent)
		);
	}

	#[test]
	fn non_numeric_values_are_rejected() {
		let json = serde_json::json!({ "data": [{ "embedding": [0.5, "oops", 1.0] }] });

		assert_eq!(question_vector(&json, 3), Err(EmbeddingFailure::NotNumeric { position: 1 }));
	}

	#[test]
	fn wrong_dimension_is_rejected() {
		let json = serde_json::json!({ "data": [{ "embedding": [0.5, 1.5] }] });

		assert_eq!(
			question_vector(&json, 1024),
			Err(EmbeddingFailure::Dimension { expected: 1024, actual: 2 })
		);
	}

	#[test]
	fn provider_errors_are_request_failures() {
		let json = serde_json::json!({ "error": { "message": "invalid model" } });

		assert!(matches!(question_vector(&json, 3), Err(EmbeddingFailure::Request(_))));
	}
}
