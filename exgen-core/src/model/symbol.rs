use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// A single element of a chain sequence.
///
/// Characters come from the canonically decomposed (NFD) form of the
/// training text. `Begin` and `End` are sentinels and can never collide with
/// a corpus character.
///
/// The derived ordering (`Begin < End < Char(_)`) is what freezes the
/// choice lists of a [`State`](super::state::State), so it must stay stable
/// for persisted snapshots to sample identically.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
	Begin,
	End,
	Char(char),
}

/// A context window of exactly `order` symbols.
pub type Context = Vec<Symbol>;

impl Symbol {
	pub fn as_char(&self) -> Option<char> {
		match self {
			Symbol::Char(c) => Some(*c),
			_ => None,
		}
	}
}

/// Decomposes `text` (NFD) and splits it into character symbols.
pub fn decompose(text: &str) -> Vec<Symbol> {
	text.nfd().map(Symbol::Char).collect()
}

/// Composed (NFC) form used for novelty comparisons and returned output.
pub fn compose(text: &str) -> String {
	text.nfc().collect()
}

/// Joins the visible characters of a symbol run. Sentinels are dropped.
pub fn join(symbols: &[Symbol]) -> String {
	symbols.iter().filter_map(Symbol::as_char).collect()
}

/// The initial context: `order` repetitions of `Begin`.
pub fn begin_context(order: usize) -> Context {
	vec![Symbol::Begin; order]
}

/// Builds the padded training sequence `Begin^order ++ symbols ++ End`.
pub fn padded(symbols: &[Symbol], order: usize) -> Vec<Symbol> {
	let mut items = Vec::with_capacity(order + symbols.len() + 1);
	items.extend(std::iter::repeat_n(Symbol::Begin, order));
	items.extend_from_slice(symbols);
	items.push(Symbol::End);
	items
}
