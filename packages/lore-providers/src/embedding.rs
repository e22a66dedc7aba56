use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Embeds `texts` in one request. Vectors come back in input order.
pub async fn embed(
	client: &Client,
	cfg: &lore_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	let mut body = serde_json::json!({ "model": cfg.model, "input": texts });

	if let Some(dimensions) = cfg.dimensions {
		body["dimensions"] = Value::from(dimensions);
	}

	let headers = crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?;
	let json = crate::post_json(client, &crate::endpoint(&cfg.api_base, &cfg.path), headers, &body)
		.await?;

	vectors_in_input_order(&json)
}

/// Items without an `index` keep their position in `data`.
fn vectors_in_input_order(json: &Value) -> Result<Vec<Vec<f32>>> {
	let Some(items) = json.get("data").and_then(Value::as_array) else {
		return Err(Error::invalid_response("Embedding response is missing data array."));
	};
	let mut ordered = items
		.iter()
		.enumerate()
		.map(|(position, item)| {
			let slot =
				item.get("index").and_then(Value::as_u64).map_or(position, |index| index as usize);

			Ok((slot, vector(item)?))
		})
		.collect::<Result<Vec<(usize, Vec<f32>)>>>()?;

	ordered.sort_by_key(|(slot, _)| *slot);

	Ok(ordered.into_iter().map(|(_, vector)| vector).collect())
}

fn vector(item: &Value) -> Result<Vec<f32>> {
	item.get("embedding")
		.and_then(Value::as_array)
		.ok_or_else(|| Error::invalid_response("Embedding item missing embedding array."))?
		.iter()
		.map(|value| {
			value
				.as_f64()
				.map(|number| number as f32)
				.ok_or_else(|| Error::invalid_response("Embedding value must be numeric."))
		})
		.collect()
}
