//! HTTP endpoints.
//!
//! - `GET /` or `/v1/generate`: generate expressions
//! - `GET /cleanup` or `/v1/cleanup`: retention sweep of persisted snapshots

use std::time::Duration;

use actix_web::{HttpResponse, Responder, routes, web};
use serde::Deserialize;
use tracing::{error, warn};

use exgen_core::Error;
use exgen_core::error::{ChainError, CorpusError};
use exgen_core::model::generate_options::GenerateOptions;
use exgen_core::service::{GenerateRequest, ModelStore};

/// Shared state of every request loop.
pub struct AppState {
	pub store: ModelStore,
	pub max_attempts: usize,
	pub max_count: usize,
	pub cleanup_max_age: Duration,
}

/// Query parameters of the generation endpoint.
///
/// `uid` and `state_size` are accepted as aliases of `identifier` and `order`.
#[derive(Deserialize)]
struct GenerateParams {
	#[serde(alias = "uid")]
	identifier: String,
	#[serde(alias = "state_size")]
	order: usize,
	count: Option<usize>,
	prefix: Option<String>,
	exclude: Option<String>,
}

#[derive(Deserialize)]
struct CleanupParams {
	/// Retention age in seconds.
	max_age: Option<u64>,
}

/// Maps an engine error to a response. Only malformed arguments and
/// corpus provider failures are expected here.
fn error_response(e: &Error) -> HttpResponse {
	match e {
		Error::InvalidRequest(_) | Error::Chain(ChainError::InvalidOrder(_)) => {
			HttpResponse::BadRequest().body(e.to_string())
		}
		Error::Corpus(CorpusError::NotFound(_)) => HttpResponse::NotFound().body(e.to_string()),
		Error::Corpus(_) => {
			warn!(error = %e, "corpus provider failed");
			HttpResponse::BadGateway().body(e.to_string())
		}
		_ => {
			error!(error = %e, "request failed");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

/// Generates `count` expressions for a language variety.
///
/// Returns a JSON array that may be shorter than `count` when attempts ran out.
#[routes]
#[get("/")]
#[get("/v1/generate")]
async fn get_generated(data: web::Data<AppState>, query: web::Query<GenerateParams>) -> impl Responder {
	let query = query.into_inner();
	let count = query.count.unwrap_or(1);
	if count > data.max_count {
		return HttpResponse::BadRequest().body(format!("count must be <= {}", data.max_count));
	}

	let options = match GenerateOptions::default()
		.with_max_attempts(data.max_attempts)
		.with_prefix(query.prefix.as_deref())
		.with_exclude_pattern(query.exclude.as_deref())
	{
		Ok(options) => options,
		Err(e) => return HttpResponse::BadRequest().body(format!("invalid exclude pattern: {e}")),
	};

	let request = GenerateRequest {
		identifier: query.identifier,
		order: query.order,
		count,
		options,
	};

	match data.store.generate(request).await {
		Ok(expressions) => HttpResponse::Ok().json(expressions),
		Err(e) => error_response(&e),
	}
}

/// Deletes snapshots older than `max_age` (default from configuration).
#[routes]
#[get("/cleanup")]
#[get("/v1/cleanup")]
async fn get_cleanup(data: web::Data<AppState>, query: web::Query<CleanupParams>) -> impl Responder {
	let max_age = query.max_age.map(Duration::from_secs).unwrap_or(data.cleanup_max_age);

	match data.store.cleanup(max_age).await {
		Ok(_) => HttpResponse::Ok().finish(),
		Err(e) => error_response(&e),
	}
}

/// Registers every endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
	cfg.service(get_generated).service(get_cleanup);
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	use actix_web::http::StatusCode;
	use actix_web::{App, test};
	use exgen_core::corpus::DirectoryCorpusProvider;
	use exgen_core::pool::WorkerPool;
	use exgen_core::store::FsSnapshotStore;
	use tempfile::TempDir;
	use tokio::runtime::Handle;

	const CORPUS: &str = "banana\t2\nbandana\t1\ncabana\t1.5\nananas\t0.7\ncanal\t1.2\n";

	fn state(dir: &TempDir) -> web::Data<AppState> {
		let corpus_dir = dir.path().join("corpus");
		std::fs::create_dir_all(&corpus_dir).unwrap();
		std::fs::write(corpus_dir.join("tst-000.tsv"), CORPUS).unwrap();

		let store = ModelStore::new(
			10,
			Arc::new(FsSnapshotStore::new(dir.path().join("data").to_str().unwrap())),
			Arc::new(DirectoryCorpusProvider::new(corpus_dir.to_str().unwrap())),
			WorkerPool::new(2),
			Handle::current(),
		)
		.with_max_order(8);
		web::Data::new(AppState {
			store,
			max_attempts: 100,
			max_count: 50,
			cleanup_max_age: Duration::from_secs(604_800),
		})
	}

	#[actix_web::test]
	async fn generate_returns_novel_expressions() {
		let dir = TempDir::new().unwrap();
		let app = test::init_service(App::new().app_data(state(&dir)).configure(configure)).await;

		let req = test::TestRequest::get()
			.uri("/v1/generate?identifier=tst-000&order=1&count=10")
			.to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::OK);

		let expressions: Vec<String> = test::read_body_json(resp).await;
		assert!(expressions.len() <= 10);
		for expression in expressions {
			assert!(!CORPUS.lines().any(|line| line.starts_with(&format!("{expression}\t"))));
		}
	}

	#[actix_web::test]
	async fn root_accepts_legacy_parameter_names() {
		let dir = TempDir::new().unwrap();
		let app = test::init_service(App::new().app_data(state(&dir)).configure(configure)).await;

		let req = test::TestRequest::get().uri("/?uid=tst-000&state_size=2&count=3&prefix=ba").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::OK);

		let expressions: Vec<String> = test::read_body_json(resp).await;
		assert!(expressions.iter().all(|e| e.starts_with("ba")));
	}

	#[actix_web::test]
	async fn malformed_arguments_are_bad_requests() {
		let dir = TempDir::new().unwrap();
		let app = test::init_service(App::new().app_data(state(&dir)).configure(configure)).await;

		for uri in [
			"/v1/generate?order=2",
			"/v1/generate?identifier=tst-000&order=-1",
			"/v1/generate?identifier=tst-000&order=0",
			"/v1/generate?identifier=tst-000&order=2&count=51",
			"/v1/generate?identifier=tst-000&order=2&exclude=(",
			"/v1/generate?identifier=..&order=2",
		] {
			let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
			assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
		}
	}

	#[actix_web::test]
	async fn oversized_order_is_a_bad_request() {
		let dir = TempDir::new().unwrap();
		let data = state(&dir);
		let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

		for uri in [
			"/v1/generate?identifier=tst-000&order=9",
			"/?uid=tst-000&state_size=100000000000000000",
		] {
			let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
			assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
		}
		assert!(data.store.cached_keys().is_empty());

		let req = test::TestRequest::get().uri("/v1/generate?identifier=tst-000&order=8").to_request();
		assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
	}

	#[actix_web::test]
	async fn unknown_corpus_is_not_found() {
		let dir = TempDir::new().unwrap();
		let app = test::init_service(App::new().app_data(state(&dir)).configure(configure)).await;

		let req = test::TestRequest::get().uri("/v1/generate?identifier=zzz-000&order=2").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);
	}

	#[actix_web::test]
	async fn cleanup_returns_empty_success_and_sweeps() {
		let dir = TempDir::new().unwrap();
		let data = state(&dir);
		let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

		let req = test::TestRequest::get().uri("/v1/generate?identifier=tst-000&order=2&count=1").to_request();
		assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
		data.store.shutdown(Duration::from_secs(5)).await;
		assert!(dir.path().join("data/tst-000/corpus.bin").is_file());

		let resp = test::call_service(&app, test::TestRequest::get().uri("/cleanup").to_request()).await;
		assert_eq!(resp.status(), StatusCode::OK);
		assert!(dir.path().join("data/tst-000/corpus.bin").is_file());

		// sleep past a zero-second retention
		tokio::time::sleep(Duration::from_millis(1100)).await;
		let resp = test::call_service(&app, test::TestRequest::get().uri("/cleanup?max_age=0").to_request()).await;
		assert_eq!(resp.status(), StatusCode::OK);
		assert!(test::read_body(resp).await.is_empty());
		assert!(!dir.path().join("data/tst-000").exists());
		assert!(data.store.cached_keys().is_empty());
	}
}
