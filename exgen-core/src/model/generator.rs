use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::chain::Chain;
use super::generate_options::GenerateOptions;
use super::symbol::{self, Context, Symbol};
use crate::corpus::CorpusEntry;
use crate::error::ChainError;

/// High-level generator for one language variety and chain order.
///
/// # Responsibilities
/// - Own the chain built from the variety's corpus
/// - Own the set of known expressions (NFC) used as the novelty oracle
/// - Continue a user-supplied prefix, filter candidates, retry on rejection
///
/// Immutable after construction; shared between requests behind an `Arc`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ExpressionGenerator {
	identifier: String,
	order: usize,
	chain: Chain,
	known: HashSet<String>,
}

impl ExpressionGenerator {
	/// Builds the chain and the known-expression set from a corpus.
	///
	/// # Errors
	/// Returns an error if `order < 1`.
	pub fn new(identifier: &str, order: usize, corpus: &[CorpusEntry]) -> Result<Self, ChainError> {
		let chain = Chain::build(corpus, order)?;
		let known = corpus.iter().map(|entry| symbol::compose(&entry.expression)).collect();

		Ok(Self {
			identifier: identifier.to_owned(),
			order,
			chain,
			known,
		})
	}

	pub fn identifier(&self) -> &str {
		&self.identifier
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn chain(&self) -> &Chain {
		&self.chain
	}

	/// Returns `true` if `expression` (in any normalization form) was in the corpus.
	pub fn is_known(&self, expression: &str) -> bool {
		self.known.contains(&symbol::compose(expression))
	}

	/// Derives the starting context for a visible prefix.
	///
	/// The prefix is preceded by `order` `Begin` symbols and the last `order`
	/// symbols are kept, so a prefix shorter than the order is still continued
	/// from the right position.
	fn start_context(&self, visible: &[Symbol]) -> Context {
		let padded: Vec<Symbol> = symbol::begin_context(self.order)
			.into_iter()
			.chain(visible.iter().copied())
			.collect();
		padded[padded.len() - self.order..].to_vec()
	}

	/// Generates one expression, or `None` when every attempt was rejected.
	///
	/// # Behavior
	/// - The prefix is decomposed like the corpus before deriving the start context.
	/// - Each attempt walks the chain from the prefix context and prepends the prefix.
	/// - A candidate is rejected if it is known (when `require_novel`) or matches
	///   the exclusion pattern.
	/// - A walk hitting an unknown context (prefix never seen in training)
	///   counts as a failed attempt.
	///
	/// # Notes
	/// - The returned expression is in composed (NFC) form.
	/// - Running out of attempts is not an error.
	pub fn generate<R: Rng + ?Sized>(&self, options: &GenerateOptions, rng: &mut R) -> Option<String> {
		let visible: Vec<Symbol> = options
			.initial_prefix
			.as_deref()
			.map(symbol::decompose)
			.unwrap_or_default();

		let context = if visible.is_empty() { None } else { Some(self.start_context(&visible)) };
		let prefix = symbol::join(&visible);

		for attempt in 0..options.max_attempts {
			let suffix = match self.chain.walk(context.as_deref(), rng) {
				Ok((suffix, _)) => suffix,
				Err(e) => {
					trace!(identifier = %self.identifier, attempt, probability = 0.0, error = %e, "walk failed");
					continue;
				}
			};

			let candidate = symbol::compose(&format!("{prefix}{}", symbol::join(&suffix)));

			if options.require_novel && self.known.contains(&candidate) {
				trace!(attempt, candidate = %candidate, "rejected known expression");
				continue;
			}
			if let Some(pattern) = &options.exclude_pattern {
				if pattern.is_match(&candidate) {
					trace!(attempt, candidate = %candidate, "rejected by exclusion pattern");
					continue;
				}
			}

			return Some(candidate);
		}

		None
	}

	/// Exact probability of `expression` under this generator's chain.
	pub fn probability(&self, expression: &str) -> f64 {
		self.chain.probability(expression)
	}

	/// Every known expression with its probability, most probable first.
	pub fn probability_distribution(&self) -> Vec<(String, f64)> {
		let mut distribution: Vec<(String, f64)> = self
			.known
			.iter()
			.map(|expression| (expression.clone(), self.chain.probability(expression)))
			.collect();
		distribution.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
		distribution
	}
}
