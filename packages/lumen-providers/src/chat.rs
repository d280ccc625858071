use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// One assistant reply from a chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
	pub content: String,
	pub total_tokens: u64,
}

/// Sends `messages` and returns the first choice, or `None` when the provider answered without
/// any usable choice.
pub async fn complete(
	cfg: &lumen_config::LlmProviderConfig,
	messages: &[Value],
) -> Result<Option<ChatCompletion>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(&url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_response(json)
}

pub fn system_message(content: &str) -> Value {
	serde_json::json!({ "role": "system", "content": content })
}

pub fn user_message(content: &str) -> Value {
	serde_json::json!({ "role": "user", "content": content })
}

fn parse_chat_response(json: Value) -> Result<Option<ChatCompletion>> {
	if let Some(message) = json.get("error").and_then(|err| err.get("message")) {
		return Err(eyre::eyre!("Chat provider returned an error: {message}."));
	}

	let Some(choices) = json.get("choices").and_then(|v| v.as_array()) else {
		return Err(eyre::eyre!("Chat response is missing choices array."));
	};
	let Some(content) = choices
		.first()
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
	else {
		tracing::warn!(choices = choices.len(), "Chat response carried no message content.");

		return Ok(None);
	};
	let total_tokens = json
		.get("usage")
		.and_then(|usage| usage.get("total_tokens"))
		.and_then(|v| v.as_u64())
		.unwrap_or(0);

	Ok(Some(ChatCompletion { content: content.to_string(), total_tokens }))
}
