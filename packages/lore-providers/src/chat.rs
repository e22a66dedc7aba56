use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: Role::System, content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: Role::User, content: content.into() }
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
	pub prompt_tokens: Option<u32>,
	pub completion_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
	pub text: String,
	pub usage: TokenUsage,
}

/// One chat-completions call. Retrying is left to the caller.
pub async fn complete(
	client: &Client,
	cfg: &lore_config::LlmProviderConfig,
	model: &str,
	messages: &[ChatMessage],
	temperature: f32,
) -> Result<Completion> {
	let body = serde_json::json!({
		"model": model,
		"temperature": temperature,
		"messages": messages,
	});
	let headers = crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?;
	let json = crate::post_json(client, &crate::endpoint(&cfg.api_base, &cfg.path), headers, &body)
		.await?;

	parse_completion(&json)
}

fn parse_completion(json: &Value) -> Result<Completion> {
	let text = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| Error::invalid_response("Completion response is missing message content."))?;
	let usage = json.get("usage");
	let count = |key: &str| {
		usage
			.and_then(|usage| usage.get(key))
			.and_then(|v| v.as_u64())
			.and_then(|v| u32::try_from(v).ok())
	};

	Ok(Completion {
		text: text.to_string(),
		usage: TokenUsage {
			prompt_tokens: count("prompt_tokens"),
			completion_tokens: count("completion_tokens"),
		},
	})
}
