use std::collections::HashSet;

/// Share of answer words found in the best-matching context, in `[0, 1]`.
pub fn support_score<'a, I>(answer: &str, contexts: I) -> f32
where
	I: IntoIterator<Item = &'a str>,
{
	let answer_words = words(answer);

	if answer_words.is_empty() {
		return 0.0;
	}

	let mut best = 0.0_f32;

	for context in contexts {
		let context_words = words(context);
		let shared = answer_words.intersection(&context_words).count();
		let score = shared as f32 / answer_words.len() as f32;

		if score > best {
			best = score;
		}
	}

	best
}

fn words(text: &str) -> HashSet<String> {
	text.split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
		.filter(|word| !word.is_empty())
		.map(str::to_lowercase)
		.collect()
}
