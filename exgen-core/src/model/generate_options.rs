use regex::Regex;

/// Default number of walks attempted before giving up on a single expression.
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Input parameters for a single expression generation.
///
/// # Responsibilities
/// - Carry the optional seed prefix to continue from
/// - Bound the number of attempts (retries-with-rejection)
/// - Carry the optional exclusion pattern and the novelty switch
///
/// # Invariants
/// - `max_attempts == 0` is allowed and always yields no result
#[derive(Clone, Debug)]
pub struct GenerateOptions {
	/// Seed text the generated expression must start with.
	pub initial_prefix: Option<String>,

	/// Number of walks to attempt before returning no result.
	pub max_attempts: usize,

	/// Candidates matching this pattern anywhere are rejected.
	pub exclude_pattern: Option<Regex>,

	/// Whether candidates already present in the training corpus are rejected.
	pub require_novel: bool,
}

impl Default for GenerateOptions {
	fn default() -> Self {
		Self {
			initial_prefix: None,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			exclude_pattern: None,
			require_novel: true,
		}
	}
}

impl GenerateOptions {
	/// Sets the seed prefix. An empty prefix is the same as none.
	pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
		self.initial_prefix = prefix.filter(|p| !p.is_empty()).map(str::to_owned);
		self
	}

	pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
		self.max_attempts = max_attempts;
		self
	}

	/// Compiles and sets the exclusion pattern.
	///
	/// # Errors
	/// Returns the regex compilation error for an invalid pattern.
	pub fn with_exclude_pattern(mut self, pattern: Option<&str>) -> Result<Self, regex::Error> {
		self.exclude_pattern = match pattern.filter(|p| !p.is_empty()) {
			Some(p) => Some(Regex::new(p)?),
			None => None,
		};
		Ok(self)
	}

	pub fn allow_known(mut self) -> Self {
		self.require_novel = false;
		self
	}
}
