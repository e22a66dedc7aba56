/// Maps a raw index distance onto a `[-1, 1]` similarity. Missing or non-finite distances
/// contribute nothing.
pub fn dense_similarity(distance: Option<f32>) -> f32 {
	match distance {
		Some(distance) if distance.is_finite() => (1.0 - distance).clamp(-1.0, 1.0),
		_ => 0.0,
	}
}

/// Weighted sum of the dense and lexical signals. Weights are not normalized, so the result is
/// only meaningful for ordering candidates of the same query.
pub fn fuse(dense_similarity: f32, lexical_overlap: f32, w_dense: f32, w_lexical: f32) -> f32 {
	w_dense * dense_similarity + w_lexical * lexical_overlap
}
