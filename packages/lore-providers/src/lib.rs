pub mod chat;
pub mod embedding;
pub mod index;
pub mod rerank;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

/// One pooled client per provider; the timeout bounds every request it sends.
pub fn http_client(timeout_ms: u64) -> Result<Client> {
	Ok(Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?)
}

pub fn auth_headers(api_key: Option<&str>, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
		headers.insert(AUTHORIZATION, format!("Bearer {key}").parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

pub(crate) fn endpoint(api_base: &str, path: &str) -> String {
	format!("{}{}", api_base.trim_end_matches('/'), path)
}

/// POSTs a JSON body and decodes a JSON reply. Non-2xx statuses are errors.
pub(crate) async fn post_json(
	client: &Client,
	url: &str,
	headers: HeaderMap,
	body: &Value,
) -> Result<Value> {
	let res = client.post(url).headers(headers).json(body).send().await?;

	Ok(res.error_for_status()?.json().await?)
}
