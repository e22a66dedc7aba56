use std::{cmp::Ordering, sync::Arc};

use serde_json::{Map, Value};

use crate::{
	Error, LexicalScorer, RequestContext, Reranker, Result, VectorIndex, metrics::Metrics,
};
use lore_config::Config;
use lore_domain::{fusion, lexical};
use lore_providers::index::IndexHits;

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
	pub id: Option<String>,
	pub text: String,
	pub metadata: Map<String, Value>,
	pub dense_similarity: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
	pub candidate: Candidate,
	pub score: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrievalResult {
	pub candidates: Vec<ScoredCandidate>,
	pub prefetch: usize,
	pub reranked: bool,
}

pub struct PartialRatioScorer;
impl LexicalScorer for PartialRatioScorer {
	fn overlap(&self, query: &str, text: &str) -> f32 {
		lexical::lexical_overlap(query, text)
	}
}

pub struct NoLexicalScorer;
impl LexicalScorer for NoLexicalScorer {
	fn overlap(&self, _query: &str, _text: &str) -> f32 {
		0.0
	}
}

pub struct HybridRetriever {
	index: Arc<dyn VectorIndex>,
	reranker: Option<Arc<dyn Reranker>>,
	lexical: Arc<dyn LexicalScorer>,
	metrics: Arc<Metrics>,
	dense_weight: f32,
	lexical_weight: f32,
	index_timeout_ms: u64,
	rerank_timeout_ms: u64,
}
impl HybridRetriever {
	pub fn new(
		cfg: &Config,
		index: Arc<dyn VectorIndex>,
		reranker: Option<Arc<dyn Reranker>>,
		lexical: Arc<dyn LexicalScorer>,
		metrics: Arc<Metrics>,
	) -> Self {
		let rerank_timeout_ms =
			cfg.providers.rerank.as_ref().map(|rerank| rerank.timeout_ms).unwrap_or(cfg.index.timeout_ms);

		Self {
			index,
			reranker,
			lexical,
			metrics,
			dense_weight: cfg.retrieval.dense_weight,
			lexical_weight: cfg.retrieval.lexical_weight,
			index_timeout_ms: cfg.index.timeout_ms,
			rerank_timeout_ms,
		}
	}

	pub async fn retrieve(
		&self,
		query: &str,
		top_k: usize,
		ctx: &RequestContext,
	) -> Result<RetrievalResult> {
		let prefetch = prefetch_size(top_k);
		let hits =
			crate::with_timeout("Index query", self.index_timeout_ms, self.index.query(query, prefetch))
				.await
				.map_err(|err| Error::Retrieval { message: err.to_string() })?;
		let mut scored: Vec<ScoredCandidate> = candidates_from_hits(hits, prefetch)
			.into_iter()
			.map(|candidate| {
				let overlap = self.lexical.overlap(query, &candidate.text);
				let score = fusion::fuse(
					candidate.dense_similarity,
					overlap,
					self.dense_weight,
					self.lexical_weight,
				);

				ScoredCandidate { candidate, score }
			})
			.collect();

		sort_desc(&mut scored);
		scored.truncate(top_k);

		let Some(reranker) = self.reranker.as_ref().filter(|_| !scored.is_empty()) else {
			log_stage("hybrid-only", prefetch, scored.len(), ctx);

			return Ok(RetrievalResult { candidates: scored, prefetch, reranked: false });
		};

		match self.rerank(&**reranker, query, &scored).await {
			Ok(scores) => {
				for (item, score) in scored.iter_mut().zip(scores) {
					item.score = score;
				}

				sort_desc(&mut scored);
				log_stage("rerank", prefetch, scored.len(), ctx);

				Ok(RetrievalResult { candidates: scored, prefetch, reranked: true })
			},
			Err(err) => {
				tracing::warn!(
					error = %err,
					trace_id = ctx.trace_id.as_deref().unwrap_or_default(),
					candidates = scored.len(),
					"Rerank failed. Keeping fused order."
				);
				self.metrics.rerank_fallback();
				log_stage("rerank-fallback", prefetch, scored.len(), ctx);

				Ok(RetrievalResult { candidates: scored, prefetch, reranked: false })
			},
		}
	}

	async fn rerank(
		&self,
		reranker: &dyn Reranker,
		query: &str,
		scored: &[ScoredCandidate],
	) -> Result<Vec<f32>> {
		let docs: Vec<String> = scored.iter().map(|item| item.candidate.text.clone()).collect();
		let scores =
			crate::with_timeout("Rerank", self.rerank_timeout_ms, reranker.score(query, &docs))
				.await?;

		if scores.len() != docs.len() {
			return Err(Error::Provider {
				message: format!(
					"Reranker returned {} scores for {} documents.",
					scores.len(),
					docs.len()
				),
			});
		}

		Ok(scores)
	}
}

/// Number of index hits fetched before fusion narrows them to `top_k`.
pub fn prefetch_size(top_k: usize) -> usize {
	top_k.saturating_mul(2).max(top_k.saturating_add(2))
}

/// Stable descending sort; NaN scores sink to the end.
pub fn sort_desc(items: &mut [ScoredCandidate]) {
	items.sort_by(|left, right| cmp_f32_desc(left.score, right.score));
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

fn candidates_from_hits(hits: IndexHits, limit: usize) -> Vec<Candidate> {
	let IndexHits { ids, documents, distances, metadatas } = hits;
	let mut ids = ids.into_iter();
	let mut distances = distances.into_iter();
	let mut metadatas = metadatas.into_iter();

	documents
		.into_iter()
		.take(limit)
		.map(|text| Candidate {
			id: ids.next().flatten(),
			text,
			metadata: metadatas.next().unwrap_or_default(),
			dense_similarity: fusion::dense_similarity(distances.next().flatten()),
		})
		.collect()
}

fn log_stage(stage: &'static str, prefetch: usize, final_k: usize, ctx: &RequestContext) {
	tracing::info!(
		stage,
		prefetch,
		final_k,
		trace_id = ctx.trace_id.as_deref().unwrap_or_default(),
		"Retrieval completed."
	);
}
