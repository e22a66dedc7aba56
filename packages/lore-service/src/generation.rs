use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
	Error, GenerationBackend, GenerationRequest, RequestContext, Result, metrics::Metrics,
	routing::Variant,
};
use lore_config::Config;
use lore_domain::AnswerPayload;
use lore_providers::chat::{ChatMessage, Completion, TokenUsage};

pub const ATTEMPT_LIMIT: u32 = 2;
pub const SYSTEM_PROMPT: &str = "Answer using only the provided CONTEXT.";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationAttempt {
	pub attempt_number: u32,
	pub temperature: f32,
	pub text: Option<String>,
	pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOutcome {
	pub text: String,
	/// Set for contract prompts only; degraded when the final attempt did not parse.
	pub parsed: Option<AnswerPayload>,
	pub degraded: bool,
	pub temperature: f32,
	pub attempts: Vec<GenerationAttempt>,
	pub usage: TokenUsage,
	pub latency: Duration,
}

/// Every attempt hit a backend error.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationFailure {
	pub last_error: String,
	pub temperature: f32,
	pub attempts: Vec<GenerationAttempt>,
	pub latency: Duration,
}

enum Step {
	Done(GenerationOutcome),
	Retry { temperature: f32, reason: &'static str },
	Failed,
}

pub struct GenerationOrchestrator {
	backend: Arc<dyn GenerationBackend>,
	metrics: Arc<Metrics>,
	timeout_ms: u64,
	temperature_step: f32,
	degraded_confidence: f32,
}
impl GenerationOrchestrator {
	pub fn new(cfg: &Config, backend: Arc<dyn GenerationBackend>, metrics: Arc<Metrics>) -> Self {
		Self {
			backend,
			metrics,
			timeout_ms: cfg.providers.llm.timeout_ms,
			temperature_step: cfg.generation.temperature_step,
			degraded_confidence: cfg.generation.degraded_confidence,
		}
	}

	pub async fn generate(
		&self,
		variant: &Variant,
		prompt: &str,
		temperature: f32,
		ctx: &RequestContext,
	) -> Result<GenerationOutcome, GenerationFailure> {
		let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
		let mut temperature = temperature;
		let mut attempts = Vec::with_capacity(ATTEMPT_LIMIT as usize);
		let mut latency = Duration::ZERO;

		for attempt_number in 1..=ATTEMPT_LIMIT {
			let request =
				GenerationRequest { model: variant.model.clone(), messages: messages.clone(), temperature };
			let started = Instant::now();
			let result = crate::with_timeout(
				"Generation",
				self.timeout_ms,
				self.backend.generate(&request),
			)
			.await
			.and_then(non_empty);

			latency = started.elapsed();

			let step = self.settle(variant, attempt_number, temperature, result, &mut attempts, latency);

			match step {
				Step::Done(outcome) => return Ok(outcome),
				Step::Retry { temperature: next, reason } => {
					tracing::info!(
						attempt = attempt_number,
						reason,
						temperature = next,
						trace_id = ctx.trace_id.as_deref().unwrap_or_default(),
						"Retrying generation."
					);
					self.metrics.generation_retry(reason);

					temperature = next;
				},
				Step::Failed => break,
			}
		}

		let last_error = attempts
			.last()
			.and_then(|attempt| attempt.error.clone())
			.unwrap_or_else(|| "Generation produced no attempts.".to_string());

		Err(GenerationFailure { last_error, temperature, attempts, latency })
	}

	fn settle(
		&self,
		variant: &Variant,
		attempt_number: u32,
		temperature: f32,
		result: Result<Completion>,
		attempts: &mut Vec<GenerationAttempt>,
		latency: Duration,
	) -> Step {
		let is_last = attempt_number >= ATTEMPT_LIMIT;
		let completion = match result {
			Ok(completion) => completion,
			Err(err) => {
				tracing::warn!(
					error = %err,
					attempt = attempt_number,
					model = variant.model.as_str(),
					"Generation attempt failed."
				);
				attempts.push(GenerationAttempt {
					attempt_number,
					temperature,
					text: None,
					error: Some(err.to_string()),
				});

				return if is_last {
					Step::Failed
				} else {
					Step::Retry { temperature, reason: "backend_error" }
				};
			},
		};

		attempts.push(GenerationAttempt {
			attempt_number,
			temperature,
			text: Some(completion.text.clone()),
			error: None,
		});

		let mut outcome = GenerationOutcome {
			text: completion.text,
			parsed: None,
			degraded: false,
			temperature,
			attempts: Vec::new(),
			usage: completion.usage,
			latency,
		};

		if !variant.prompt_version.requires_json() {
			outcome.attempts = attempts.clone();

			return Step::Done(outcome);
		}

		match AnswerPayload::parse(&outcome.text) {
			Ok(parsed) => outcome.parsed = Some(parsed),
			Err(err) if !is_last => {
				tracing::info!(
					error = %err,
					attempt = attempt_number,
					"Answer does not match the JSON contract."
				);

				return Step::Retry {
					temperature: (temperature - self.temperature_step).max(0.0),
					reason: "schema_invalid",
				};
			},
			Err(err) => {
				tracing::warn!(
					error = %err,
					attempt = attempt_number,
					"Answer does not match the JSON contract. Returning a degraded payload."
				);

				outcome.parsed = Some(AnswerPayload::degraded(&outcome.text, self.degraded_confidence));
				outcome.degraded = true;
			},
		}

		outcome.attempts = attempts.clone();

		Step::Done(outcome)
	}
}

fn non_empty(completion: Completion) -> Result<Completion> {
	if completion.text.trim().is_empty() {
		return Err(Error::Provider {
			message: "Generation backend returned an empty completion.".to_string(),
		});
	}

	Ok(completion)
}
