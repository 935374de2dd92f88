//! Search for the most probable expressions of a chain.

use rand::Rng;

use super::chain::{Chain, slide};
use super::symbol::{self, Symbol};

/// Lazy branch-and-bound search over random descents of a chain.
///
/// Each descent starts at the `Begin` context and samples its way down,
/// multiplying the running probability. Since every step has a probability
/// of at most 1, a descent whose running probability is already `<=` the
/// best complete one can never win and is abandoned.
///
/// Yields strictly improving `(expression, probability)` pairs and stops
/// once more than `tries` consecutive descents failed to improve.
pub struct BestProbabilitySearch<'a, R> {
	chain: &'a Chain,
	rng: R,
	tries: usize,
	misses: usize,
	best: f64,
	done: bool,
}

/// Starts a best-probability search on `chain`.
pub fn best_probability<R: Rng>(chain: &Chain, tries: usize, rng: R) -> BestProbabilitySearch<'_, R> {
	BestProbabilitySearch {
		chain,
		rng,
		tries,
		misses: 0,
		best: 0.0,
		done: false,
	}
}

impl<R: Rng> BestProbabilitySearch<'_, R> {
	/// Probability of the best complete expression found so far.
	pub fn best(&self) -> f64 {
		self.best
	}

	/// One descent from `Begin`. Returns the expression if it beat the incumbent.
	fn descend(&mut self) -> Option<(Vec<Symbol>, f64)> {
		let mut context = symbol::begin_context(self.chain.order());
		let mut expression = Vec::new();
		let mut probability = 1.0;

		loop {
			let (next, p) = self.chain.sample(&context, &mut self.rng).ok()?;
			probability *= p;
			if probability <= self.best {
				return None;
			}
			if next == Symbol::End {
				return Some((expression, probability));
			}
			expression.push(next);
			slide(&mut context, next);
		}
	}
}

impl<R: Rng> Iterator for BestProbabilitySearch<'_, R> {
	type Item = (String, f64);

	fn next(&mut self) -> Option<Self::Item> {
		while !self.done {
			match self.descend() {
				Some((expression, probability)) => {
					self.best = probability;
					self.misses = 0;
					return Some((symbol::compose(&symbol::join(&expression)), probability));
				}
				None => {
					self.misses += 1;
					if self.misses > self.tries {
						self.done = true;
					}
				}
			}
		}
		None
	}
}
