pub mod answer;
pub mod cost;
pub mod fusion;
pub mod grounding;
pub mod guardrail;
pub mod lexical;
pub mod prompt;

pub use answer::AnswerPayload;
pub use guardrail::{GuardrailRejection, Guardrails};
pub use prompt::PromptVersion;
