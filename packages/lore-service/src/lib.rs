pub mod ask;
pub mod feedback;
pub mod generation;
pub mod metrics;
pub mod retrieval;
pub mod routing;

mod error;

pub use ask::{AskRequest, AskResponse, Source};
pub use error::{Error, Result};
pub use feedback::FeedbackLog;
pub use generation::{GenerationAttempt, GenerationFailure, GenerationOrchestrator, GenerationOutcome};
pub use metrics::{Exemplar, Metrics};
pub use retrieval::{
	Candidate, HybridRetriever, NoLexicalScorer, PartialRatioScorer, RetrievalResult,
	ScoredCandidate,
};
pub use routing::{RandomDraw, Variant, VariantOverrides, VariantRouter, VariantSource};

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use reqwest::Client;

use lore_config::{
	Config, EmbeddingProviderConfig, IndexConfig, LlmProviderConfig, RerankProviderConfig,
};
use lore_domain::Guardrails;
use lore_providers::{
	chat::{self, ChatMessage, Completion},
	embedding,
	index::{self, IndexHits},
	rerank,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn query<'a>(&'a self, text: &'a str, n_results: usize) -> BoxFuture<'a, Result<IndexHits>>;
}

pub trait Reranker
where
	Self: Send + Sync,
{
	/// One score per document, aligned by position.
	fn score<'a>(&'a self, query: &'a str, docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>>;
}

pub trait GenerationBackend
where
	Self: Send + Sync,
{
	fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<Completion>>;
}

pub trait LexicalScorer
where
	Self: Send + Sync,
{
	fn overlap(&self, query: &str, text: &str) -> f32;
}

pub trait CanaryDraw
where
	Self: Send + Sync,
{
	/// A uniform value in `[0, 1)`.
	fn draw(&self) -> f64;
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
	pub model: String,
	pub messages: Vec<ChatMessage>,
	pub temperature: f32,
}

/// Correlation data carried explicitly through one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
	pub trace_id: Option<String>,
}
impl RequestContext {
	pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
		Self { trace_id: Some(trace_id.into()) }
	}
}

#[derive(Clone)]
pub struct Backends {
	pub index: Arc<dyn VectorIndex>,
	pub reranker: Option<Arc<dyn Reranker>>,
	pub generation: Arc<dyn GenerationBackend>,
	pub lexical: Arc<dyn LexicalScorer>,
	pub canary: Arc<dyn CanaryDraw>,
}
impl Backends {
	/// HTTP collaborators for every configured provider.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let index = HttpIndex::new(&cfg.index, cfg.providers.embedding.as_ref())?;
		let reranker = match cfg.providers.rerank.as_ref() {
			Some(rerank_cfg) => {
				Some(Arc::new(HttpReranker::new(rerank_cfg)?) as Arc<dyn Reranker>)
			},
			None => None,
		};
		let lexical: Arc<dyn LexicalScorer> = if cfg.retrieval.lexical_enabled {
			Arc::new(PartialRatioScorer)
		} else {
			Arc::new(NoLexicalScorer)
		};

		Ok(Self {
			index: Arc::new(index),
			reranker,
			generation: Arc::new(HttpGeneration::new(&cfg.providers.llm)?),
			lexical,
			canary: Arc::new(RandomDraw),
		})
	}
}

pub struct HttpIndex {
	client: Client,
	cfg: IndexConfig,
	embedding: Option<(Client, EmbeddingProviderConfig)>,
}
impl HttpIndex {
	pub fn new(cfg: &IndexConfig, embedding: Option<&EmbeddingProviderConfig>) -> Result<Self> {
		let embedding = match embedding {
			Some(embedding_cfg) => Some((
				lore_providers::http_client(embedding_cfg.timeout_ms)?,
				embedding_cfg.clone(),
			)),
			None => None,
		};

		Ok(Self { client: lore_providers::http_client(cfg.timeout_ms)?, cfg: cfg.clone(), embedding })
	}
}

impl VectorIndex for HttpIndex {
	fn query<'a>(&'a self, text: &'a str, n_results: usize) -> BoxFuture<'a, Result<IndexHits>> {
		Box::pin(async move {
			let vector = match &self.embedding {
				Some((client, embedding_cfg)) => {
					let vectors = embedding::embed(client, embedding_cfg, &[text.to_string()]).await?;
					let Some(vector) = vectors.into_iter().next() else {
						return Err(Error::Provider {
							message: "Embedding provider returned no vectors.".to_string(),
						});
					};

					Some(vector)
				},
				None => None,
			};

			Ok(index::query(&self.client, &self.cfg, text, vector.as_deref(), n_results).await?)
		})
	}
}

pub struct HttpReranker {
	client: Client,
	cfg: RerankProviderConfig,
}
impl HttpReranker {
	pub fn new(cfg: &RerankProviderConfig) -> Result<Self> {
		Ok(Self { client: lore_providers::http_client(cfg.timeout_ms)?, cfg: cfg.clone() })
	}
}

impl Reranker for HttpReranker {
	fn score<'a>(&'a self, query: &'a str, docs: &'a [String]) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { Ok(rerank::rerank(&self.client, &self.cfg, query, docs).await?) })
	}
}

pub struct HttpGeneration {
	client: Client,
	cfg: LlmProviderConfig,
}
impl HttpGeneration {
	pub fn new(cfg: &LlmProviderConfig) -> Result<Self> {
		Ok(Self { client: lore_providers::http_client(cfg.timeout_ms)?, cfg: cfg.clone() })
	}
}

impl GenerationBackend for HttpGeneration {
	fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<Completion>> {
		Box::pin(async move {
			Ok(chat::complete(
				&self.client,
				&self.cfg,
				&request.model,
				&request.messages,
				request.temperature,
			)
			.await?)
		})
	}
}

pub struct RagService {
	pub cfg: Config,
	pub metrics: Arc<Metrics>,
	pub feedback: FeedbackLog,
	pub(crate) guardrails: Guardrails,
	pub(crate) router: VariantRouter,
	pub(crate) retriever: HybridRetriever,
	pub(crate) generator: GenerationOrchestrator,
}
impl RagService {
	pub fn new(cfg: Config) -> Result<Self> {
		let backends = Backends::from_config(&cfg)?;

		Self::with_backends(cfg, backends)
	}

	pub fn with_backends(cfg: Config, backends: Backends) -> Result<Self> {
		let metrics = Arc::new(Metrics::new()?);
		let guardrails = Guardrails::new(&cfg.guardrails)?;
		let router = VariantRouter::new(&cfg.routing, backends.canary);
		let retriever = HybridRetriever::new(
			&cfg,
			backends.index,
			backends.reranker,
			backends.lexical,
			metrics.clone(),
		);
		let generator = GenerationOrchestrator::new(&cfg, backends.generation, metrics.clone());
		let feedback = FeedbackLog::new(cfg.feedback.path.clone());

		Ok(Self { cfg, metrics, feedback, guardrails, router, retriever, generator })
	}
}

/// Outer bound on an external call, on top of the client's own timeout.
pub(crate) async fn with_timeout<T, F>(
	operation: &'static str,
	timeout_ms: u64,
	fut: F,
) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
		Ok(result) => result,
		Err(_) => Err(Error::Timeout { operation, timeout_ms }),
	}
}
