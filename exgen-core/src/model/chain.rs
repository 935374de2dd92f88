use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::State;
use super::symbol::{self, Context, Symbol};
use crate::corpus::CorpusEntry;
use crate::error::ChainError;

/// Weighted Markov chain over character symbols.
///
/// The `Chain` maps every context window of `order` symbols seen during
/// training to the distribution of the symbol that followed it, weighted by
/// the corpus weight of the expressions crossing it.
///
/// # Responsibilities
/// - Build the transition table from a weighted corpus
/// - Sample a next symbol for a context (with its probability)
/// - Walk complete sequences from the `Begin` context or a given one
/// - Score the exact probability of a complete expression
///
/// # Invariants
/// - `order` is always >= 1
/// - Every key of `states` has exactly `order` symbols
/// - Contexts never reached by the corpus are absent, not zero-weighted
/// - The `Begin` distribution lives in `begin`, not in `states`
/// - A chain is never mutated after `build`; a new corpus means a new chain
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Chain {
	/// Number of preceding symbols used as context.
	order: usize,

	/// Mapping from a context window to its frozen distribution.
	states: HashMap<Context, State>,

	/// Precomputed distribution of the all-`Begin` context.
	/// `None` only when the corpus contributed no transitions.
	begin: Option<State>,
}

impl Chain {
	/// Builds a chain of the given order from a weighted corpus.
	///
	/// Every expression is decomposed (NFD) and padded with `order` `Begin`
	/// symbols and one `End`. Each window of `order` symbols records the
	/// symbol following it, adding the entry weight.
	///
	/// Entries with a zero, negative or non-finite weight are skipped so that
	/// every recorded transition has a probability in `(0, 1]`.
	///
	/// # Errors
	/// Returns an error if `order < 1`.
	pub fn build(corpus: &[CorpusEntry], order: usize) -> Result<Self, ChainError> {
		if order < 1 {
			return Err(ChainError::InvalidOrder(order));
		}

		let mut table: HashMap<Context, BTreeMap<Symbol, f64>> = HashMap::new();
		let mut skipped = 0usize;

		for entry in corpus {
			if !(entry.weight.is_finite() && entry.weight > 0.0) {
				skipped += 1;
				continue;
			}

			let run = symbol::decompose(&entry.expression);
			let items = symbol::padded(&run, order);

			for i in 0..=run.len() {
				let context = items[i..i + order].to_vec();
				let follow = items[i + order];
				*table.entry(context).or_default().entry(follow).or_insert(0.0) += entry.weight;
			}
		}

		if skipped > 0 {
			debug!(skipped, "ignored corpus entries without positive weight");
		}

		let begin_key = symbol::begin_context(order);
		let begin = table.remove(&begin_key).map(State::freeze);
		let states = table
			.into_iter()
			.map(|(context, transitions)| (context, State::freeze(transitions)))
			.collect();

		Ok(Self { order, states, begin })
	}

	/// Returns the order (context length) of the chain.
	pub fn order(&self) -> usize {
		self.order
	}

	/// Number of distinct contexts, the `Begin` context included.
	pub fn len(&self) -> usize {
		self.states.len() + usize::from(self.begin.is_some())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Looks up the state for a context, serving `Begin` from the precomputed one.
	pub fn state(&self, context: &[Symbol]) -> Option<&State> {
		if context.len() != self.order {
			return None;
		}
		if context.iter().all(|s| *s == Symbol::Begin) {
			return self.begin.as_ref();
		}
		self.states.get(context)
	}

	/// Iterates over every `(context, state)` pair of the transition table.
	pub fn states(&self) -> impl Iterator<Item = (Context, &State)> + '_ {
		let begin = self
			.begin
			.as_ref()
			.map(|state| (symbol::begin_context(self.order), state));
		begin
			.into_iter()
			.chain(self.states.iter().map(|(context, state)| (context.clone(), state)))
	}

	/// Samples the next symbol after `context`, with its conditional probability.
	///
	/// # Errors
	/// Returns `UnknownContext` if the context was never seen in training.
	pub fn sample<R: Rng + ?Sized>(
		&self,
		context: &[Symbol],
		rng: &mut R,
	) -> Result<(Symbol, f64), ChainError> {
		self.state(context)
			.and_then(|state| state.predict(rng))
			.ok_or_else(|| ChainError::UnknownContext(context.to_vec()))
	}

	/// Walks the chain until `End`, starting from `initial` or the `Begin` context.
	///
	/// Returns the emitted symbols (without `End`) and the exact probability of
	/// the walk under the model.
	///
	/// # Errors
	/// Returns `UnknownContext` as soon as a context is missing from the table.
	pub fn walk<R: Rng + ?Sized>(
		&self,
		initial: Option<&[Symbol]>,
		rng: &mut R,
	) -> Result<(Vec<Symbol>, f64), ChainError> {
		let mut context = match initial {
			Some(context) => context.to_vec(),
			None => symbol::begin_context(self.order),
		};

		let mut output = Vec::new();
		let mut probability = 1.0;
		loop {
			let (next, p) = self.sample(&context, rng)?;
			probability *= p;
			if next == Symbol::End {
				break;
			}
			output.push(next);
			slide(&mut context, next);
		}

		Ok((output, probability))
	}

	/// Exact probability of `expression` under the model.
	///
	/// Replays the padded sequence and multiplies the conditional probability
	/// of every observed step. Any unseen context or transition makes the
	/// whole expression impossible, so the result is exactly 0.
	pub fn probability(&self, expression: &str) -> f64 {
		let run = symbol::decompose(expression);
		let items = symbol::padded(&run, self.order);

		let mut probability = 1.0;
		for i in 0..=run.len() {
			let Some(state) = self.state(&items[i..i + self.order]) else {
				return 0.0;
			};
			let p = state.probability(&items[i + self.order]);
			if p == 0.0 {
				return 0.0;
			}
			probability *= p;
		}
		probability
	}
}

/// Drops the oldest symbol of `context` and appends `next`.
pub(crate) fn slide(context: &mut Context, next: Symbol) {
	if !context.is_empty() {
		context.remove(0);
	}
	context.push(next);
}
