use regex::{Captures, Regex, RegexBuilder};

const INJECTION_PATTERNS: [&str; 4] = [
	r"ignore (all|the) previous instructions",
	r"disregard (the )?system prompt",
	r"system: .* override",
	r"exfiltrate|leak (data|key|secret)",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailRejection {
	PromptInjection,
	ExternalLinks,
}
impl GuardrailRejection {
	pub fn code(self) -> &'static str {
		match self {
			Self::PromptInjection => "prompt_injection_detected",
			Self::ExternalLinks => "external_links_blocked",
		}
	}
}

/// Input checks applied to a question before it reaches retrieval. Patterns are compiled once.
pub struct Guardrails {
	cfg: lore_config::Guardrails,
	injection: Vec<Regex>,
	url: Regex,
	email: Regex,
	phone: Regex,
}
impl Guardrails {
	pub fn new(cfg: &lore_config::Guardrails) -> Result<Self, regex::Error> {
		let injection = INJECTION_PATTERNS
			.iter()
			.map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Self {
			cfg: cfg.clone(),
			injection,
			url: Regex::new(r"https?://\S+")?,
			email: Regex::new(r"([A-Za-z0-9._%+-]+)@([A-Za-z0-9.-]+\.[A-Za-z]{2,})")?,
			phone: Regex::new(r"(\+?\d[\d\-\s]{7,}\d)")?,
		})
	}

	/// Returns the question with PII masked, or the first rule it violates.
	pub fn check(&self, question: &str) -> Result<String, GuardrailRejection> {
		if self.cfg.block_injection && self.contains_injection(question) {
			return Err(GuardrailRejection::PromptInjection);
		}
		if self.cfg.block_external_links && !self.external_links(question).is_empty() {
			return Err(GuardrailRejection::ExternalLinks);
		}
		if self.cfg.mask_pii {
			return Ok(self.mask_pii(question));
		}

		Ok(question.to_string())
	}

	pub fn contains_injection(&self, text: &str) -> bool {
		self.injection.iter().any(|re| re.is_match(text))
	}

	/// Links whose registrable domain is not on the allowlist.
	pub fn external_links<'a>(&self, text: &'a str) -> Vec<&'a str> {
		self.url
			.find_iter(text)
			.map(|found| found.as_str())
			.filter(|url| {
				registrable_domain(url)
					.map(|domain| !self.cfg.link_allowlist.iter().any(|allowed| *allowed == domain))
					.unwrap_or(true)
			})
			.collect()
	}

	pub fn mask_pii(&self, text: &str) -> String {
		let masked = self.email.replace_all(text, |caps: &Captures| {
			let local = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
			let domain = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
			let first: String = local.chars().take(1).collect();

			format!("{first}***@{domain}")
		});

		self.phone
			.replace_all(&masked, |caps: &Captures| {
				let digits = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
				let head: String = digits.chars().take(3).collect();

				format!("{head}****")
			})
			.into_owned()
	}
}

/// Last two labels of the URL host, lowercased. Multi-label public suffixes are not modeled.
fn registrable_domain(url: &str) -> Option<String> {
	let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
	let authority = rest.split(['/', '?', '#']).next()?;
	let host_port = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
	let host = host_port.split(':').next()?.trim_end_matches('.').to_ascii_lowercase();

	if host.is_empty() {
		return None;
	}

	let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();

	match labels.len() {
		0 => None,
		1 => Some(labels[0].to_string()),
		n => Some(format!("{}.{}", labels[n - 2], labels[n - 1])),
	}
}
