use serde::{Deserialize, Serialize};

/// Structured answer returned by the v2 prompt contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
	pub answer: String,
	#[serde(default)]
	pub citations: Vec<String>,
	pub confidence: f32,
}
impl AnswerPayload {
	pub fn parse(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}

	/// Wraps unparseable model output so the caller still receives an answer.
	pub fn degraded(raw: &str, confidence: f32) -> Self {
		Self { answer: raw.to_string(), citations: Vec::new(), confidence }
	}
}
