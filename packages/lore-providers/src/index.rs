use reqwest::Client;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Parallel arrays of one collection query. `documents` drives the candidate count; the other
/// arrays may be shorter and are read positionally.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexHits {
	pub ids: Vec<Option<String>>,
	pub documents: Vec<String>,
	pub distances: Vec<Option<f32>>,
	pub metadatas: Vec<Map<String, Value>>,
}
impl IndexHits {
	pub fn len(&self) -> usize {
		self.documents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.documents.is_empty()
	}
}

/// Queries the collection with either a precomputed embedding or the raw text.
pub async fn query(
	client: &Client,
	cfg: &lore_config::IndexConfig,
	text: &str,
	embedding: Option<&[f32]>,
	n_results: usize,
) -> Result<IndexHits> {
	let mut body = serde_json::json!({
		"n_results": n_results,
		"include": ["documents", "distances", "metadatas"],
	});

	match embedding {
		Some(vector) => body["query_embeddings"] = serde_json::json!([vector]),
		None => body["query_texts"] = serde_json::json!([text]),
	}

	let headers = crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?;
	let json = crate::post_json(client, &crate::endpoint(&cfg.api_base, &cfg.path), headers, &body)
		.await?;

	parse_query_response(&json)
}

fn parse_query_response(json: &Value) -> Result<IndexHits> {
	if !json.is_object() {
		return Err(Error::invalid_response("Index response must be a JSON object."));
	}

	let documents = first_row(json, "documents")
		.iter()
		.map(|value| value.as_str().unwrap_or_default().to_string())
		.collect();
	let ids = first_row(json, "ids").iter().map(|value| value.as_str().map(str::to_string)).collect();
	let distances =
		first_row(json, "distances").iter().map(|value| value.as_f64().map(|d| d as f32)).collect();
	let metadatas = first_row(json, "metadatas")
		.iter()
		.map(|value| value.as_object().cloned().unwrap_or_default())
		.collect();

	Ok(IndexHits { ids, documents, distances, metadatas })
}

/// Results are nested per query text; only one query is ever sent.
fn first_row<'a>(json: &'a Value, key: &str) -> &'a [Value] {
	json.get(key)
		.and_then(Value::as_array)
		.and_then(|rows| rows.first())
		.and_then(Value::as_array)
		.map(Vec::as_slice)
		.unwrap_or(&[])
}
