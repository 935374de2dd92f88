use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::Error;

/// Fixed-size pool for blocking, CPU-heavy jobs.
///
/// Jobs run on tokio's blocking threads, but at most `size` of them at once;
/// further callers wait for a permit instead of piling onto the runtime.
/// The async caller is suspended meanwhile, so the request loop keeps serving.
#[derive(Clone, Debug)]
pub struct WorkerPool {
	permits: Arc<Semaphore>,
	size: usize,
}

impl WorkerPool {
	/// Creates a pool of `size` workers; 0 means one per CPU core.
	pub fn new(size: usize) -> Self {
		let size = if size == 0 { num_cpus::get() } else { size };
		Self {
			permits: Arc::new(Semaphore::new(size)),
			size,
		}
	}

	pub fn size(&self) -> usize {
		self.size
	}

	/// Number of workers currently free.
	pub fn available(&self) -> usize {
		self.permits.available_permits()
	}

	/// Runs `job` on a worker and awaits its result.
	///
	/// The permit travels with the job, so a caller that stops waiting does
	/// not free the worker before the job is actually done.
	///
	/// # Errors
	/// Returns [`Error::Worker`] if the pool is closed or the job panicked.
	pub async fn run<F, T>(&self, job: F) -> Result<T, Error>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		let permit = self
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Error::Worker("worker pool closed".to_owned()))?;

		tokio::task::spawn_blocking(move || {
			let _permit = permit;
			job()
		})
		.await
		.map_err(|e| Error::Worker(e.to_string()))
	}
}
