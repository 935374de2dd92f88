//! exgen server entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at the configured level
//!   4. Build the corpus provider, snapshot store, worker pool and model store
//!   5. Serve until interrupted, then flush pending snapshot writes

mod config;
mod error;
mod handlers;
mod logger;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use tokio::runtime::Handle;
use tracing::info;

use exgen_core::corpus::{CorpusProvider, DirectoryCorpusProvider, PgCorpusProvider};
use exgen_core::pool::WorkerPool;
use exgen_core::service::ModelStore;
use exgen_core::store::FsSnapshotStore;

use config::CorpusSource;
use error::AppError;
use handlers::AppState;

/// Time granted to background snapshot writes on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() {
	if let Err(e) = run().await {
		eprintln!("error: {e}");
		std::process::exit(1);
	}
}

async fn run() -> Result<(), AppError> {
	// .env is optional.
	let _ = dotenvy::dotenv();

	let args = parse_cli_args();
	let config = config::load(args.config_path.as_deref())?;
	logger::init(&config.log_level)?;

	info!(
		bind = %config.bind,
		data_dir = %config.data_dir,
		corpus = ?config.corpus_source,
		"config loaded"
	);

	let mut postgres = None;
	let corpus: Arc<dyn CorpusProvider> = match config.corpus_source {
		CorpusSource::Postgres => {
			let provider = Arc::new(PgCorpusProvider::connect_lazy(&config.postgres)?);
			postgres = Some(provider.clone());
			provider
		}
		CorpusSource::Directory => Arc::new(DirectoryCorpusProvider::new(&config.corpus_directory)),
	};

	let workers = WorkerPool::new(config.worker_pool_size);
	info!(workers = workers.size(), "worker pool ready");

	let state = web::Data::new(AppState {
		store: ModelStore::new(
			config.cache_capacity,
			Arc::new(FsSnapshotStore::new(&config.data_dir)),
			corpus,
			workers,
			Handle::current(),
		)
		.with_max_order(config.max_order),
		max_attempts: config.max_attempts,
		max_count: config.max_count,
		cleanup_max_age: config.cleanup_max_age,
	});

	let cors = config.cors;
	let server_state = state.clone();
	HttpServer::new(move || {
		let cors = if cors { Cors::permissive() } else { Cors::default() };
		App::new()
			.app_data(server_state.clone())
			.wrap(cors)
			.configure(handlers::configure)
	})
	.workers(config.http_workers)
	.bind(&config.bind)?
	.run()
	.await?;

	info!("server stopped, flushing snapshots");
	state.store.shutdown(SHUTDOWN_GRACE).await;
	if let Some(postgres) = postgres {
		postgres.close().await;
	}

	Ok(())
}

struct CliArgs {
	config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
	let mut config_path = None;

	let mut iter = std::env::args().skip(1);
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => {
				println!("Usage: exgen-server [OPTIONS]");
				println!();
				println!("Options:");
				println!("  -h, --help                 Print help");
				println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
				std::process::exit(0);
			}
			"-f" | "--config" => {
				if let Some(path) = iter.next() {
					config_path = Some(path);
				} else {
					eprintln!("error: -f/--config requires a path argument");
					std::process::exit(1);
				}
			}
			_ => {}
		}
	}

	CliArgs { config_path }
}
