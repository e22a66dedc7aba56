use std::{collections::HashMap, sync::Mutex, time::Duration};

use prometheus::{
	Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub const RETRIEVE_LATENCY: &str = "rag_retrieve_latency_seconds";
pub const GENERATE_LATENCY: &str = "rag_generate_latency_seconds";

const LATENCY_BUCKETS: [f64; 10] = [0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];
const LENGTH_BUCKETS: [f64; 10] =
	[16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1_024.0, 2_048.0, 4_096.0, 8_192.0];

/// The most recent trace id observed by a histogram.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
	pub trace_id: String,
	pub value: f64,
}

/// Process-wide telemetry. Every collector lives in one registry rendered by `/metrics`.
pub struct Metrics {
	registry: Registry,
	requests: IntCounterVec,
	retrieve_latency: Histogram,
	generate_latency: Histogram,
	answer_length: Histogram,
	generate_retries: IntCounterVec,
	rerank_fallbacks: IntCounter,
	guardrail_rejections: IntCounterVec,
	exemplars: Mutex<HashMap<&'static str, Exemplar>>,
}
impl Metrics {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();
		let requests = IntCounterVec::new(
			Opts::new("rag_requests_total", "Answer requests by routed variant."),
			&["model", "prompt_version"],
		)?;
		let retrieve_latency = Histogram::with_opts(
			HistogramOpts::new(RETRIEVE_LATENCY, "Retrieval latency in seconds.")
				.buckets(LATENCY_BUCKETS.to_vec()),
		)?;
		let generate_latency = Histogram::with_opts(
			HistogramOpts::new(GENERATE_LATENCY, "Latency of the final generation attempt in seconds.")
				.buckets(LATENCY_BUCKETS.to_vec()),
		)?;
		let answer_length = Histogram::with_opts(
			HistogramOpts::new("rag_answer_length_chars", "Answer length in characters.")
				.buckets(LENGTH_BUCKETS.to_vec()),
		)?;
		let generate_retries = IntCounterVec::new(
			Opts::new("rag_generate_retries_total", "Generation retries by reason."),
			&["reason"],
		)?;
		let rerank_fallbacks = IntCounter::new(
			"rag_rerank_fallbacks_total",
			"Retrievals that kept the fused order after a rerank failure.",
		)?;
		let guardrail_rejections = IntCounterVec::new(
			Opts::new("rag_guardrail_rejections_total", "Questions rejected by input guardrails."),
			&["reason"],
		)?;

		registry.register(Box::new(requests.clone()))?;
		registry.register(Box::new(retrieve_latency.clone()))?;
		registry.register(Box::new(generate_latency.clone()))?;
		registry.register(Box::new(answer_length.clone()))?;
		registry.register(Box::new(generate_retries.clone()))?;
		registry.register(Box::new(rerank_fallbacks.clone()))?;
		registry.register(Box::new(guardrail_rejections.clone()))?;

		Ok(Self {
			registry,
			requests,
			retrieve_latency,
			generate_latency,
			answer_length,
			generate_retries,
			rerank_fallbacks,
			guardrail_rejections,
			exemplars: Mutex::new(HashMap::new()),
		})
	}

	pub fn record_request(&self, model: &str, prompt_version: &str) {
		self.requests.with_label_values(&[model, prompt_version]).inc();
	}

	pub fn observe_retrieve(&self, elapsed: Duration, trace_id: Option<&str>) {
		let value = elapsed.as_secs_f64();

		self.retrieve_latency.observe(value);
		self.keep_exemplar(RETRIEVE_LATENCY, value, trace_id);
	}

	pub fn observe_generate(&self, elapsed: Duration, trace_id: Option<&str>) {
		let value = elapsed.as_secs_f64();

		self.generate_latency.observe(value);
		self.keep_exemplar(GENERATE_LATENCY, value, trace_id);
	}

	pub fn observe_answer_length(&self, chars: usize) {
		self.answer_length.observe(chars as f64);
	}

	pub fn generation_retry(&self, reason: &str) {
		self.generate_retries.with_label_values(&[reason]).inc();
	}

	pub fn rerank_fallback(&self) {
		self.rerank_fallbacks.inc();
	}

	pub fn guardrail_rejection(&self, reason: &str) {
		self.guardrail_rejections.with_label_values(&[reason]).inc();
	}

	pub fn exemplar(&self, histogram: &str) -> Option<Exemplar> {
		self.exemplars.lock().unwrap_or_else(|err| err.into_inner()).get(histogram).cloned()
	}

	/// Prometheus text exposition. Encoding failures are logged and yield an empty body.
	pub fn encode(&self) -> String {
		let mut buffer = Vec::new();

		if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
			tracing::warn!(error = %err, "Metrics encoding failed.");

			return String::new();
		}

		match String::from_utf8(buffer) {
			Ok(text) => text,
			Err(err) => {
				tracing::warn!(error = %err, "Metrics output is not valid UTF-8.");

				String::new()
			},
		}
	}

	fn keep_exemplar(&self, histogram: &'static str, value: f64, trace_id: Option<&str>) {
		let Some(trace_id) = trace_id else { return };

		tracing::debug!(histogram, value, trace_id, "Exemplar recorded.");

		self.exemplars
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.insert(histogram, Exemplar { trace_id: trace_id.to_string(), value });
	}
}
