use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::{
	Error, RagService, RequestContext, Result,
	generation::{GenerationOutcome, SYSTEM_PROMPT},
	retrieval::RetrievalResult,
	routing::{Variant, VariantOverrides},
};
use lore_config::MAX_TEMPERATURE;
use lore_domain::{AnswerPayload, cost, grounding, prompt};

/// Body of an answer request. Every field is optional at the wire level; `ask` validates.
///
/// Numbers sent as strings and fractional `top_k` values are coerced. A field of any other
/// shape fails deserialization with a message naming that field.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AskRequest {
	#[serde(default, deserialize_with = "question_field")]
	pub question: Option<String>,
	#[serde(default, deserialize_with = "top_k_field")]
	pub top_k: Option<i64>,
	#[serde(default, deserialize_with = "temperature_field")]
	pub temperature: Option<f64>,
	#[serde(default, deserialize_with = "model_field")]
	pub model: Option<String>,
	#[serde(default, deserialize_with = "prompt_version_field")]
	pub prompt_version: Option<String>,
}
impl AskRequest {
	/// Reads a parsed JSON body. Non-object bodies carry no fields.
	pub fn from_json(value: Value) -> Result<Self> {
		if !value.is_object() {
			return Ok(Self::default());
		}

		serde_json::from_value(value).map_err(|err| Error::invalid_request(err.to_string()))
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Source {
	pub id: Option<String>,
	pub metadata: Map<String, Value>,
	pub dense_similarity: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AskResponse {
	pub answer: String,
	pub parsed: Option<AnswerPayload>,
	pub sources: Vec<Source>,
	pub used_reranker: bool,
	pub top_k: u32,
	pub model: String,
	pub prompt_version: String,
	pub temperature: f32,
}

struct AnswerSummary<'a> {
	question: &'a str,
	top_k: u32,
	variant: &'a Variant,
	retrieval: &'a RetrievalResult,
	rendered: &'a str,
	outcome: &'a GenerationOutcome,
	retrieve_elapsed: Duration,
}

struct Validated {
	question: String,
	top_k: u32,
	temperature: f32,
}

impl RagService {
	pub async fn ask(&self, req: AskRequest, ctx: &RequestContext) -> Result<AskResponse> {
		let span = tracing::info_span!("rag.ask", trace_id = ctx.trace_id.as_deref().unwrap_or_default());

		self.ask_inner(req, ctx).instrument(span).await
	}

	async fn ask_inner(&self, req: AskRequest, ctx: &RequestContext) -> Result<AskResponse> {
		let Validated { question, top_k, temperature } = self.validate(&req)?;
		let question = match self.guardrails.check(&question) {
			Ok(question) => question,
			Err(rejection) => {
				let code = rejection.code();

				self.metrics.guardrail_rejection(code);
				tracing::info!(reason = code, "Question rejected by guardrails.");

				return Err(Error::Guardrail { code });
			},
		};
		let overrides = VariantOverrides { model: req.model, prompt_version: req.prompt_version };
		let variant = self.router.choose_variant(&overrides);
		let trace_id = ctx.trace_id.as_deref();

		self.metrics.record_request(&variant.model, variant.prompt_version.as_str());

		let started = Instant::now();
		let retrieval = self.retriever.retrieve(&question, top_k as usize, ctx).await;
		let retrieve_elapsed = started.elapsed();

		self.metrics.observe_retrieve(retrieve_elapsed, trace_id);

		let retrieval = retrieval.inspect_err(|err| {
			tracing::error!(error = %err, "Retrieval failed.");
		})?;
		let context = prompt::join_context(
			retrieval.candidates.iter().map(|item| item.candidate.text.as_str()),
			self.cfg.retrieval.context_doc_max_chars,
		);
		let rendered = prompt::build_prompt(variant.prompt_version, &question, &context);
		let outcome = match self.generator.generate(&variant, &rendered, temperature, ctx).await {
			Ok(outcome) => outcome,
			Err(failure) => {
				self.metrics.observe_generate(failure.latency, trace_id);
				tracing::error!(
					error = failure.last_error.as_str(),
					attempts = failure.attempts.len(),
					model = variant.model.as_str(),
					prompt_version = variant.prompt_version.as_str(),
					"Generation failed."
				);

				return Err(Error::Generation { detail: failure.last_error });
			},
		};

		self.metrics.observe_generate(outcome.latency, trace_id);
		self.metrics.observe_answer_length(outcome.text.chars().count());
		self.log_answer(AnswerSummary {
			question: &question,
			top_k,
			variant: &variant,
			retrieval: &retrieval,
			rendered: &rendered,
			outcome: &outcome,
			retrieve_elapsed,
		});

		let sources = retrieval
			.candidates
			.into_iter()
			.map(|item| Source {
				id: item.candidate.id,
				metadata: item.candidate.metadata,
				dense_similarity: item.candidate.dense_similarity,
			})
			.collect();

		Ok(AskResponse {
			answer: outcome.text,
			parsed: outcome.parsed,
			sources,
			used_reranker: retrieval.reranked,
			top_k,
			model: variant.model,
			prompt_version: variant.prompt_version.as_str().to_string(),
			temperature: outcome.temperature,
		})
	}

	fn validate(&self, req: &AskRequest) -> Result<Validated> {
		let question = req.question.as_deref().map(str::trim).unwrap_or_default();

		if question.is_empty() {
			return Err(Error::invalid_request("question is required"));
		}

		let top_k = match req.top_k {
			None => self.cfg.retrieval.top_k,
			Some(top_k) if top_k <= 0 => {
				return Err(Error::invalid_request("top_k must be greater than zero"));
			},
			Some(top_k) => {
				u32::try_from(top_k).unwrap_or(u32::MAX).min(self.cfg.retrieval.max_top_k)
			},
		};
		let temperature = match req.temperature {
			None => self.cfg.providers.llm.temperature,
			Some(value) if (0.0..=f64::from(MAX_TEMPERATURE)).contains(&value) => value as f32,
			Some(_) => {
				return Err(Error::invalid_request(
					"temperature must be a finite number between 0 and 2",
				));
			},
		};

		Ok(Validated { question: question.to_string(), top_k, temperature })
	}

	fn log_answer(&self, summary: AnswerSummary<'_>) {
		let AnswerSummary { question, top_k, variant, retrieval, rendered, outcome, retrieve_elapsed } =
			summary;
		let answer_text =
			outcome.parsed.as_ref().map(|parsed| parsed.answer.as_str()).unwrap_or(outcome.text.as_str());
		let support = grounding::support_score(
			answer_text,
			retrieval.candidates.iter().map(|item| item.candidate.text.as_str()),
		);
		let prompt_tokens = outcome.usage.prompt_tokens.unwrap_or_else(|| {
			cost::estimate_tokens(SYSTEM_PROMPT).saturating_add(cost::estimate_tokens(rendered))
		});
		let completion_tokens =
			outcome.usage.completion_tokens.unwrap_or_else(|| cost::estimate_tokens(&outcome.text));
		let cost_usd =
			cost::estimate_cost_usd(&self.cfg.cost, &variant.model, prompt_tokens, completion_tokens);

		tracing::info!(
			question,
			source_count = retrieval.candidates.len(),
			rerank = retrieval.reranked,
			top_k,
			model = variant.model.as_str(),
			variant_source = variant.source.as_str(),
			prompt_version = variant.prompt_version.as_str(),
			attempts = outcome.attempts.len(),
			degraded = outcome.degraded,
			latency_retrieve_ms = retrieve_elapsed.as_millis() as u64,
			latency_generate_ms = outcome.latency.as_millis() as u64,
			support_score = support,
			prompt_tokens,
			completion_tokens,
			cost_usd,
			"Answer assembled."
		);
	}
}

fn question_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	text_field(deserializer, "question must be a string")
}

fn model_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	text_field(deserializer, "model must be a string")
}

fn prompt_version_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	text_field(deserializer, "prompt_version must be a string")
}

fn text_field<'de, D>(deserializer: D, message: &'static str) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(text)) => Ok(Some(text)),
		Some(_) => Err(de::Error::custom(message)),
	}
}

fn top_k_field<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	let top_k = match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => return Ok(None),
		Some(Value::Number(number)) => number.as_i64().or_else(|| {
			number.as_f64().filter(|value| value.is_finite()).map(|value| value.trunc() as i64)
		}),
		Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
		Some(_) => None,
	};

	top_k.map(Some).ok_or_else(|| de::Error::custom("top_k must be an integer"))
}

fn temperature_field<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
	D: Deserializer<'de>,
{
	let temperature = match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => return Ok(None),
		Some(Value::Number(number)) => number.as_f64(),
		Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
		Some(_) => None,
	};

	temperature.map(Some).ok_or_else(|| de::Error::custom("temperature must be a number"))
}
