pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	InvalidRequest { message: String },
	#[error("Guardrail rejected the question: {code}.")]
	Guardrail { code: &'static str },
	#[error("Retrieval error: {message}")]
	Retrieval { message: String },
	#[error("Generation error: {detail}")]
	Generation { detail: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("{operation} timed out after {timeout_ms} ms.")]
	Timeout { operation: &'static str, timeout_ms: u64 },
	#[error("Feedback error: {message}")]
	Feedback { message: String },
	#[error("Initialization error: {message}")]
	Init { message: String },
}
impl Error {
	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}
}

impl From<lore_providers::Error> for Error {
	fn from(err: lore_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<prometheus::Error> for Error {
	fn from(err: prometheus::Error) -> Self {
		Self::Init { message: err.to_string() }
	}
}

impl From<regex::Error> for Error {
	fn from(err: regex::Error) -> Self {
		Self::Init { message: err.to_string() }
	}
}
