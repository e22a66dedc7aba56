//! In-process collaborators for exercising the answer pipeline without network access.

use std::{
	collections::VecDeque,
	path::PathBuf,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use serde_json::{Map, Value};
use uuid::Uuid;

use lore_config::Config;
use lore_providers::{
	chat::{Completion, TokenUsage},
	index::IndexHits,
};
use lore_service::{
	Backends, BoxFuture, CanaryDraw, Error, GenerationBackend, GenerationRequest, NoLexicalScorer,
	RagService, Reranker, Result, VectorIndex,
};

const CONFIG_TEMPLATE: &str = r#"
[service]
http_bind = "127.0.0.1:0"
log_level = "info"

[index]
api_base = "http://127.0.0.1:9"
path = "/api/v1/collections/kb/query"
timeout_ms = 1000

[providers.llm]
api_base = "http://127.0.0.1:9"
api_key = "test"
path = "/v1/chat/completions"
temperature = 0.2
timeout_ms = 1000

[routing]
primary_model = "llama3.1"
alternate_model = "llama3.1-canary"
canary_ratio = 0.0
default_prompt_version = "v1"

[guardrails]
link_allowlist = ["example.com"]
"#;

/// A valid configuration with no optional providers and a unique feedback path.
pub fn test_config() -> Config {
	let mut cfg: Config = toml::from_str(CONFIG_TEMPLATE).expect("Test config must parse.");

	cfg.feedback.path = temp_feedback_path();

	lore_config::validate(&cfg).expect("Test config must be valid.");

	cfg
}

pub fn temp_feedback_path() -> PathBuf {
	std::env::temp_dir()
		.join(format!("lore_test_{}", Uuid::new_v4().simple()))
		.join("feedback.jsonl")
}

/// Backends with lexical scoring disabled, no reranker, and a draw that never hits the canary.
pub fn backends(index: Arc<dyn VectorIndex>, generation: Arc<dyn GenerationBackend>) -> Backends {
	Backends {
		index,
		reranker: None,
		generation,
		lexical: Arc::new(NoLexicalScorer),
		canary: Arc::new(FixedDraw(0.999)),
	}
}

pub fn service(cfg: Config, backends: Backends) -> RagService {
	RagService::with_backends(cfg, backends).expect("Service must build.")
}

pub struct FixedDraw(pub f64);
impl CanaryDraw for FixedDraw {
	fn draw(&self) -> f64 {
		self.0
	}
}

/// Returns the same hits for every query. Document `i` gets id `doc-i` and a `source` field.
pub struct StaticIndex {
	hits: IndexHits,
	requested: Mutex<Vec<usize>>,
}
impl StaticIndex {
	pub fn new(docs: &[(&str, f32)]) -> Self {
		let mut hits = IndexHits::default();

		for (i, (text, distance)) in docs.iter().enumerate() {
			let mut metadata = Map::new();

			metadata.insert("source".to_string(), Value::String(format!("doc-{i}.md")));

			hits.ids.push(Some(format!("doc-{i}")));
			hits.documents.push(text.to_string());
			hits.distances.push(Some(*distance));
			hits.metadatas.push(metadata);
		}

		Self { hits, requested: Mutex::new(Vec::new()) }
	}

	pub fn calls(&self) -> usize {
		self.requested.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	/// `n_results` of every query so far.
	pub fn requested(&self) -> Vec<usize> {
		self.requested.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}

impl VectorIndex for StaticIndex {
	fn query<'a>(&'a self, _text: &'a str, n_results: usize) -> BoxFuture<'a, Result<IndexHits>> {
		self.requested.lock().unwrap_or_else(|err| err.into_inner()).push(n_results);

		let hits = self.hits.clone();

		Box::pin(async move { Ok(hits) })
	}
}

#[derive(Default)]
pub struct FailingIndex {
	calls: AtomicUsize,
}
impl FailingIndex {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl VectorIndex for FailingIndex {
	fn query<'a>(&'a self, _text: &'a str, _n_results: usize) -> BoxFuture<'a, Result<IndexHits>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Err(Error::Provider { message: "index unavailable".to_string() }) })
	}
}

/// Scores each document by looking its text up in a table; unknown texts score zero.
pub struct ScriptedReranker {
	scores: Vec<(String, f32)>,
	calls: AtomicUsize,
}
impl ScriptedReranker {
	pub fn new(scores: &[(&str, f32)]) -> Self {
		Self {
			scores: scores.iter().map(|(text, score)| (text.to_string(), *score)).collect(),
			calls: AtomicUsize::new(0),
		}
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl Reranker for ScriptedReranker {
	fn score<'a>(&'a self, _query: &'a str, docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let scores = docs
			.iter()
			.map(|doc| {
				self.scores
					.iter()
					.find(|(text, _)| text == doc)
					.map(|(_, score)| *score)
					.unwrap_or(0.0)
			})
			.collect();

		Box::pin(async move { Ok(scores) })
	}
}

#[derive(Default)]
pub struct FailingReranker {
	calls: AtomicUsize,
}
impl FailingReranker {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl Reranker for FailingReranker {
	fn score<'a>(&'a self, _query: &'a str, _docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Err(Error::Provider { message: "reranker unavailable".to_string() }) })
	}
}

/// Returns the same scores whatever the documents are.
pub struct FixedReranker {
	scores: Vec<f32>,
	calls: AtomicUsize,
}
impl FixedReranker {
	pub fn new(scores: Vec<f32>) -> Self {
		Self { scores, calls: AtomicUsize::new(0) }
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl Reranker for FixedReranker {
	fn score<'a>(&'a self, _query: &'a str, _docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let scores = self.scores.clone();

		Box::pin(async move { Ok(scores) })
	}
}

/// Never answers.
#[derive(Default)]
pub struct StalledReranker {
	calls: AtomicUsize,
}
impl StalledReranker {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl Reranker for StalledReranker {
	fn score<'a>(&'a self, _query: &'a str, _docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(std::future::pending())
	}
}

#[derive(Clone, Debug)]
pub enum Reply {
	Text(String),
	Error(String),
	/// The call never completes.
	Stall,
}
impl Reply {
	pub fn text(text: &str) -> Self {
		Self::Text(text.to_string())
	}

	pub fn error(message: &str) -> Self {
		Self::Error(message.to_string())
	}
}

/// Plays back replies in order and records every request it receives.
pub struct ScriptedGeneration {
	replies: Mutex<VecDeque<Reply>>,
	requests: Mutex<Vec<GenerationRequest>>,
}
impl ScriptedGeneration {
	pub fn new(replies: Vec<Reply>) -> Self {
		Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) }
	}

	pub fn calls(&self) -> usize {
		self.requests.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn requests(&self) -> Vec<GenerationRequest> {
		self.requests.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn temperatures(&self) -> Vec<f32> {
		self.requests().iter().map(|request| request.temperature).collect()
	}
}

impl GenerationBackend for ScriptedGeneration {
	fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<Completion>> {
		self.requests.lock().unwrap_or_else(|err| err.into_inner()).push(request.clone());

		let reply = self.replies.lock().unwrap_or_else(|err| err.into_inner()).pop_front();

		Box::pin(async move {
			match reply {
				Some(Reply::Text(text)) => Ok(Completion { text, usage: TokenUsage::default() }),
				Some(Reply::Error(message)) => Err(Error::Provider { message }),
				Some(Reply::Stall) => std::future::pending().await,
				None => Err(Error::Provider { message: "No scripted reply left.".to_string() }),
			}
		})
	}
}
