use std::{collections::HashMap, path::PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub index: IndexConfig,
	pub providers: Providers,
	pub routing: Routing,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub generation: Generation,
	#[serde(default)]
	pub guardrails: Guardrails,
	#[serde(default)]
	pub feedback: Feedback,
	#[serde(default)]
	pub cost: Cost,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
	/// Either "text" or "json".
	#[serde(default = "default_log_format")]
	pub log_format: String,
}

/// Collection query endpoint of the vector index.
#[derive(Clone, Debug, Deserialize)]
pub struct IndexConfig {
	pub api_base: String,
	/// Appended to `api_base`, e.g. "/api/v1/collections/<id>/query".
	pub path: String,
	pub api_key: Option<String>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	/// When absent the index embeds `query_texts` itself.
	pub embedding: Option<EmbeddingProviderConfig>,
	pub rerank: Option<RerankProviderConfig>,
	pub llm: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: Option<u32>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RerankProviderConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_rerank_batch_size")]
	pub batch_size: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	/// Temperature used when a request does not carry one.
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Routing {
	pub primary_model: String,
	pub alternate_model: String,
	#[serde(default)]
	pub canary_ratio: f64,
	#[serde(default = "default_prompt_version")]
	pub default_prompt_version: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub top_k: u32,
	pub max_top_k: u32,
	pub dense_weight: f32,
	pub lexical_weight: f32,
	pub lexical_enabled: bool,
	pub context_doc_max_chars: Option<usize>,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			top_k: 8,
			max_top_k: 50,
			dense_weight: 0.7,
			lexical_weight: 0.3,
			lexical_enabled: true,
			context_doc_max_chars: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Generation {
	pub temperature_step: f32,
	pub degraded_confidence: f32,
}
impl Default for Generation {
	fn default() -> Self {
		Self { temperature_step: 0.2, degraded_confidence: 0.4 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Guardrails {
	pub mask_pii: bool,
	pub block_injection: bool,
	pub block_external_links: bool,
	/// Registrable domains such as "example.com".
	pub link_allowlist: Vec<String>,
}
impl Default for Guardrails {
	fn default() -> Self {
		Self {
			mask_pii: true,
			block_injection: true,
			block_external_links: true,
			link_allowlist: Vec::new(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Feedback {
	pub path: PathBuf,
}
impl Default for Feedback {
	fn default() -> Self {
		Self { path: PathBuf::from("data/feedback.jsonl") }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Cost {
	pub default_input_usd_per_1k: f64,
	pub default_output_usd_per_1k: f64,
	pub models: HashMap<String, ModelRate>,
}
impl Default for Cost {
	fn default() -> Self {
		Self {
			default_input_usd_per_1k: 0.1,
			default_output_usd_per_1k: 0.1,
			models: HashMap::new(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelRate {
	pub input_usd_per_1k: f64,
	pub output_usd_per_1k: f64,
}

fn default_log_format() -> String {
	"text".to_string()
}

fn default_prompt_version() -> String {
	"v1".to_string()
}

fn default_rerank_batch_size() -> u32 {
	8
}

fn default_true() -> bool {
	true
}
