use std::collections::BTreeMap;

use rand::Rng;

use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

/// Represents a state in a chain.
///
/// A `State` is everything known about one context window: the symbols that
/// were observed right after it and the accumulated corpus weight of each.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by the training weight of the expressions crossing them.
///
/// The distribution is frozen once, when the chain is built: choices are
/// sorted, and the running sum of their weights is kept alongside so that
/// sampling is a single binary search instead of a linear scan.
///
/// ## Invariants
/// - `choices` is sorted and free of duplicates
/// - every weight is strictly positive and finite
/// - `cumulative` is strictly increasing and its last value is the total weight
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct State {
	choices: Vec<Symbol>,
	weights: Vec<f64>,
	cumulative: Vec<f64>,
}

impl State {
	/// Freezes accumulated transitions into sorted choice/cumulative arrays.
	pub(crate) fn freeze(transitions: BTreeMap<Symbol, f64>) -> Self {
		let mut choices = Vec::with_capacity(transitions.len());
		let mut weights = Vec::with_capacity(transitions.len());
		let mut cumulative = Vec::with_capacity(transitions.len());

		let mut running = 0.0;
		for (symbol, weight) in transitions {
			running += weight;
			choices.push(symbol);
			weights.push(weight);
			cumulative.push(running);
		}

		Self { choices, weights, cumulative }
	}

	/// Total outgoing weight of this state.
	pub fn total(&self) -> f64 {
		self.cumulative.last().copied().unwrap_or(0.0)
	}

	/// Accumulated weight of the transition toward `symbol`, if it was observed.
	pub fn weight(&self, symbol: &Symbol) -> Option<f64> {
		let index = self.choices.binary_search(symbol).ok()?;
		Some(self.weights[index])
	}

	/// Conditional probability of `symbol` following this state.
	///
	/// Returns 0 for a transition that was never observed.
	pub fn probability(&self, symbol: &Symbol) -> f64 {
		match self.weight(symbol) {
			Some(weight) => weight / self.total(),
			None => 0.0,
		}
	}

	/// Iterates over `(symbol, weight)` pairs in choice order.
	pub fn transitions(&self) -> impl Iterator<Item = (Symbol, f64)> + '_ {
		self.choices.iter().copied().zip(self.weights.iter().copied())
	}

	/// Predicts the next symbol using weighted random sampling.
	///
	/// Draws `r` uniformly in `[0, total)` and picks the first choice whose
	/// cumulative weight is `>= r`. Also returns the probability of the pick.
	///
	/// Returns `None` if the state has no transitions.
	pub fn predict<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(Symbol, f64)> {
		let total = self.total();
		if self.choices.is_empty() || !(total > 0.0) {
			return None;
		}

		let r = rng.random_range(0.0..total);
		let index = self
			.cumulative
			.partition_point(|&c| c < r)
			.min(self.choices.len() - 1);

		Some((self.choices[index], self.weights[index] / total))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn state(pairs: &[(char, f64)]) -> State {
		State::freeze(pairs.iter().map(|(c, w)| (Symbol::Char(*c), *w)).collect())
	}

	#[test]
	fn freeze_sorts_and_accumulates() {
		let s = state(&[('c', 1.0), ('b', 3.0)]);
		let pairs: Vec<_> = s.transitions().collect();
		assert_eq!(pairs, vec![(Symbol::Char('b'), 3.0), (Symbol::Char('c'), 1.0)]);
		assert_eq!(s.cumulative, vec![3.0, 4.0]);
		assert_eq!(s.total(), 4.0);
	}

	#[test]
	fn probability_of_unseen_symbol_is_zero() {
		let s = state(&[('b', 3.0), ('c', 1.0)]);
		assert_eq!(s.probability(&Symbol::Char('b')), 0.75);
		assert_eq!(s.probability(&Symbol::Char('z')), 0.0);
	}

	#[test]
	fn empty_state_predicts_nothing() {
		let s = State::freeze(BTreeMap::new());
		assert!(s.predict(&mut StdRng::seed_from_u64(1)).is_none());
	}

	#[test]
	fn sampling_converges_to_weight_proportions() {
		let s = state(&[('b', 3.0), ('c', 1.0)]);
		let mut rng = StdRng::seed_from_u64(42);
		let draws = 40_000;
		let mut hits = 0;
		for _ in 0..draws {
			let (symbol, probability) = s.predict(&mut rng).unwrap();
			if symbol == Symbol::Char('b') {
				hits += 1;
				assert_eq!(probability, 0.75);
			} else {
				assert_eq!(probability, 0.25);
			}
		}
		let ratio = hits as f64 / draws as f64;
		assert!((ratio - 0.75).abs() < 0.02, "ratio was {ratio}");
	}
}
