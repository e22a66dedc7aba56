use std::sync::Arc;

use crate::CanaryDraw;
use lore_config::Routing;
use lore_domain::PromptVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantSource {
	Override,
	Canary,
	Primary,
}
impl VariantSource {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Override => "override",
			Self::Canary => "canary",
			Self::Primary => "primary",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
	pub model: String,
	pub prompt_version: PromptVersion,
	pub source: VariantSource,
}

/// Caller-supplied choices. Header values take precedence over body fields before they land
/// here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariantOverrides {
	pub model: Option<String>,
	pub prompt_version: Option<String>,
}

pub struct RandomDraw;
impl CanaryDraw for RandomDraw {
	fn draw(&self) -> f64 {
		rand::random::<f64>()
	}
}

pub struct VariantRouter {
	primary_model: String,
	alternate_model: String,
	canary_ratio: f64,
	default_prompt_version: PromptVersion,
	draw: Arc<dyn CanaryDraw>,
}
impl VariantRouter {
	pub fn new(cfg: &Routing, draw: Arc<dyn CanaryDraw>) -> Self {
		Self {
			primary_model: cfg.primary_model.clone(),
			alternate_model: cfg.alternate_model.clone(),
			canary_ratio: cfg.canary_ratio.clamp(0.0, 1.0),
			default_prompt_version: PromptVersion::parse_lossy(&cfg.default_prompt_version),
			draw,
		}
	}

	pub fn choose_variant(&self, overrides: &VariantOverrides) -> Variant {
		let prompt_version = overrides
			.prompt_version
			.as_deref()
			.and_then(PromptVersion::parse)
			.unwrap_or(self.default_prompt_version);

		if let Some(model) = overrides.model.as_deref().filter(|model| !model.trim().is_empty()) {
			return Variant { model: model.to_string(), prompt_version, source: VariantSource::Override };
		}
		if self.canary_ratio > 0.0 && self.draw.draw() < self.canary_ratio {
			return Variant {
				model: self.alternate_model.clone(),
				prompt_version,
				source: VariantSource::Canary,
			};
		}

		Variant { model: self.primary_model.clone(), prompt_version, source: VariantSource::Primary }
	}
}
