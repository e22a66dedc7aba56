use std::fmt;

use serde::{Deserialize, Serialize};

const PROMPT_V1: &str = "You are a helpful assistant. Use ONLY the CONTEXT to answer.

CONTEXT:
{ctx}

QUESTION: {q}
Rules:
- If the answer is not in the context, say \"I'm not sure.\"
- Be concise and cite short snippets if helpful.
";

const PROMPT_V2: &str = "ROLE: Knowledge-grounded assistant. Respond only from CONTEXT.

CONTEXT:
{ctx}

Q: {q}
ANSWER FORMAT (JSON):
{
 \"answer\": \"...\",
 \"citations\": [],
 \"confidence\": 0.0
}
If missing info: answer \"I'm not sure.\"
";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVersion {
	V1,
	V2,
}
impl PromptVersion {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::V1 => "v1",
			Self::V2 => "v2",
		}
	}

	/// Exact match on "v1" or "v2".
	pub fn parse(label: &str) -> Option<Self> {
		match label {
			"v1" => Some(Self::V1),
			"v2" => Some(Self::V2),
			_ => None,
		}
	}

	pub fn parse_lossy(label: &str) -> Self {
		Self::parse(label).unwrap_or(Self::V1)
	}

	/// Whether generated text must satisfy the JSON answer contract.
	pub fn requires_json(self) -> bool {
		matches!(self, Self::V2)
	}

	fn template(self) -> &'static str {
		match self {
			Self::V1 => PROMPT_V1,
			Self::V2 => PROMPT_V2,
		}
	}
}
impl fmt::Display for PromptVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

pub fn build_prompt(version: PromptVersion, question: &str, context: &str) -> String {
	render(version.template(), &[("q", question), ("ctx", context)])
}

/// Joins retrieved texts with a blank line, truncating each to `max_chars` characters.
pub fn join_context<'a, I>(texts: I, max_chars: Option<usize>) -> String
where
	I: IntoIterator<Item = &'a str>,
{
	let mut parts = Vec::new();

	for text in texts {
		match max_chars.filter(|max| *max > 0) {
			Some(max) => match text.char_indices().nth(max) {
				Some((cut, _)) => parts.push(&text[..cut]),
				None => parts.push(text),
			},
			None => parts.push(text),
		}
	}

	parts.join("\n\n")
}

/// Single-pass substitution of `{name}` placeholders. Unknown or malformed braces are copied
/// verbatim and substituted values are never scanned again.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
	let extra: usize = vars.iter().map(|(_, value)| value.len()).sum();
	let mut out = String::with_capacity(template.len() + extra);
	let mut rest = template;

	while let Some(open) = rest.find('{') {
		out.push_str(&rest[..open]);

		let after = &rest[open + 1..];
		let value = after.find('}').and_then(|close| {
			let name = &after[..close];

			vars.iter().find(|(key, _)| *key == name).map(|(_, value)| (close, *value))
		});

		match value {
			Some((close, value)) => {
				out.push_str(value);

				rest = &after[close + 1..];
			},
			None => {
				out.push('{');

				rest = after;
			},
		}
	}

	out.push_str(rest);

	out
}
