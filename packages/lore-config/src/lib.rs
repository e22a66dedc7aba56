mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Cost, EmbeddingProviderConfig, Feedback, Generation, Guardrails, IndexConfig,
	LlmProviderConfig, ModelRate, Providers, RerankProviderConfig, Retrieval, Routing, Service,
};

use std::{fs, path::Path};

/// Upper bound for any sampling temperature, configured or requested.
pub const MAX_TEMPERATURE: f32 = 2.0;

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
	if !matches!(cfg.service.log_format.as_str(), "text" | "json") {
		return Err(Error::Validation {
			message: "service.log_format must be one of text or json.".to_string(),
		});
	}

	for (label, base, timeout_ms) in [
		("index", &cfg.index.api_base, cfg.index.timeout_ms),
		("providers.llm", &cfg.providers.llm.api_base, cfg.providers.llm.timeout_ms),
	] {
		if base.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label}.api_base must be non-empty.") });
		}
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label}.timeout_ms must be greater than zero."),
			});
		}
	}

	if let Some(embedding) = cfg.providers.embedding.as_ref() {
		if embedding.api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: "providers.embedding.api_base must be non-empty.".to_string(),
			});
		}
		if embedding.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
			});
		}
		if embedding.dimensions == Some(0) {
			return Err(Error::Validation {
				message: "providers.embedding.dimensions must be greater than zero.".to_string(),
			});
		}
	}
	if let Some(rerank) = cfg.providers.rerank.as_ref()
		&& rerank.enabled
	{
		if rerank.api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: "providers.rerank.api_base must be non-empty.".to_string(),
			});
		}
		if rerank.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "providers.rerank.timeout_ms must be greater than zero.".to_string(),
			});
		}
		if rerank.batch_size == 0 {
			return Err(Error::Validation {
				message: "providers.rerank.batch_size must be greater than zero.".to_string(),
			});
		}
	}
	if !(0.0..=MAX_TEMPERATURE).contains(&cfg.providers.llm.temperature) {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be a finite number between 0 and 2."
				.to_string(),
		});
	}

	for (label, model) in [
		("routing.primary_model", &cfg.routing.primary_model),
		("routing.alternate_model", &cfg.routing.alternate_model),
	] {
		if model.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if !cfg.routing.canary_ratio.is_finite() {
		return Err(Error::Validation {
			message: "routing.canary_ratio must be a finite number.".to_string(),
		});
	}
	if !matches!(cfg.routing.default_prompt_version.as_str(), "v1" | "v2") {
		return Err(Error::Validation {
			message: "routing.default_prompt_version must be one of v1 or v2.".to_string(),
		});
	}
	if cfg.retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.max_top_k < cfg.retrieval.top_k {
		return Err(Error::Validation {
			message: "retrieval.max_top_k must be at least retrieval.top_k.".to_string(),
		});
	}

	for (label, weight) in [
		("retrieval.dense_weight", cfg.retrieval.dense_weight),
		("retrieval.lexical_weight", cfg.retrieval.lexical_weight),
	] {
		if !weight.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
	}

	if !cfg.generation.temperature_step.is_finite() || cfg.generation.temperature_step < 0.0 {
		return Err(Error::Validation {
			message: "generation.temperature_step must be a finite number, zero or greater."
				.to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.generation.degraded_confidence) {
		return Err(Error::Validation {
			message: "generation.degraded_confidence must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.feedback.path.as_os_str().is_empty() {
		return Err(Error::Validation { message: "feedback.path must be non-empty.".to_string() });
	}

	for (model, rate) in &cfg.cost.models {
		if !rate.input_usd_per_1k.is_finite() || !rate.output_usd_per_1k.is_finite() {
			return Err(Error::Validation {
				message: format!("cost.models.{model} rates must be finite numbers."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.index.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.index.api_key = None;
	}
	if cfg.providers.rerank.as_ref().map(|rerank| !rerank.enabled).unwrap_or(false) {
		cfg.providers.rerank = None;
	}
	// Zero disables context truncation.
	if cfg.retrieval.context_doc_max_chars == Some(0) {
		cfg.retrieval.context_doc_max_chars = None;
	}

	cfg.guardrails.link_allowlist = cfg
		.guardrails
		.link_allowlist
		.iter()
		.map(|domain| domain.trim().to_ascii_lowercase())
		.filter(|domain| !domain.is_empty())
		.collect();
}
