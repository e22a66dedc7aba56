use std::collections::HashMap;

/// Longest pattern compared window by window; the pattern is one `u128` bitmask wide.
pub const MAX_PATTERN_CHARS: usize = 128;
/// Longest text scanned for the best window.
pub const MAX_TEXT_CHARS: usize = 8_192;

/// Partial-match ratio in `[0, 1]` between the lowercased query and candidate text.
pub fn lexical_overlap(query: &str, text: &str) -> f32 {
	partial_ratio(&query.to_lowercase(), &text.to_lowercase())
}

/// Best indel similarity of the shorter string against every window of the longer string with
/// the same length. Empty input scores zero. The shorter side is cut to [`MAX_PATTERN_CHARS`]
/// and the longer side to [`MAX_TEXT_CHARS`].
pub fn partial_ratio(left: &str, right: &str) -> f32 {
	let left: Vec<char> = left.chars().collect();
	let right: Vec<char> = right.chars().collect();
	let (mut short, mut long) = if left.len() <= right.len() { (left, right) } else { (right, left) };

	if short.is_empty() {
		return 0.0;
	}

	short.truncate(MAX_PATTERN_CHARS);
	long.truncate(MAX_TEXT_CHARS);

	let pattern = Pattern::new(&short);
	let width = short.len();
	let mut best = 0.0_f32;

	for window in long.windows(width) {
		let ratio = (2 * pattern.lcs_len(window)) as f32 / (2 * width) as f32;

		if ratio > best {
			best = ratio;
		}
		if best >= 1.0 {
			break;
		}
	}

	best
}

/// Bit-parallel LCS length against a fixed pattern of at most 128 chars.
struct Pattern {
	masks: HashMap<char, u128>,
	len: usize,
	full: u128,
}
impl Pattern {
	fn new(chars: &[char]) -> Self {
		let len = chars.len().min(MAX_PATTERN_CHARS);
		let mut masks: HashMap<char, u128> = HashMap::new();

		for (bit, ch) in chars.iter().take(len).enumerate() {
			*masks.entry(*ch).or_default() |= 1_u128 << bit;
		}

		let full = if len == MAX_PATTERN_CHARS { u128::MAX } else { (1_u128 << len) - 1 };

		Self { masks, len, full }
	}

	fn lcs_len(&self, text: &[char]) -> usize {
		let mut row = self.full;

		for ch in text {
			let matches = self.masks.get(ch).copied().unwrap_or_default();
			let hits = row & matches;

			row = (row.wrapping_add(hits) | (row & !matches)) & self.full;
		}

		self.len - row.count_ones() as usize
	}
}
