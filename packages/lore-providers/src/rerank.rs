use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Scores `docs` against `query` in batches of `cfg.batch_size`, aligned with input order.
pub async fn rerank(
	client: &Client,
	cfg: &lore_config::RerankProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<f32>> {
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let headers = crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?;
	let batch_size = (cfg.batch_size as usize).max(1);
	let mut scores = Vec::with_capacity(docs.len());

	for batch in docs.chunks(batch_size) {
		let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": batch });
		let json = crate::post_json(client, &url, headers.clone(), &body).await?;

		scores.extend(parse_rerank_response(json, batch.len())?);
	}

	Ok(scores)
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores: Vec<Option<f32>> = vec![None; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Rerank response is missing results array."))?;

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing index."))? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing score."))? as f32;

		if let Some(slot) = scores.get_mut(index) {
			*slot = Some(score);
		}
	}

	scores
		.into_iter()
		.collect::<Option<Vec<_>>>()
		.ok_or_else(|| Error::invalid_response("Rerank response did not score every document."))
}
