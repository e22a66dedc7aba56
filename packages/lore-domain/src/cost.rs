/// Rough token count used when the backend does not report usage.
pub fn estimate_tokens(text: &str) -> u32 {
	let chars = text.chars().count() / 4;

	u32::try_from(chars).unwrap_or(u32::MAX).max(1)
}

pub fn estimate_cost_usd(
	cfg: &lore_config::Cost,
	model: &str,
	prompt_tokens: u32,
	completion_tokens: u32,
) -> f64 {
	let (input, output) = match cfg.models.get(model) {
		Some(rate) => (rate.input_usd_per_1k, rate.output_usd_per_1k),
		None => (cfg.default_input_usd_per_1k, cfg.default_output_usd_per_1k),
	};

	(prompt_tokens as f64 * input + completion_tokens as f64 * output) / 1_000.0
}
