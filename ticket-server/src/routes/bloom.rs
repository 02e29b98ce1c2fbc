//! `GET /bloom` (§4.5, §6): validators poll this for the latest Bloom
//! snapshot, optionally asking only for something newer than a version they
//! already cached.

use std::convert::Infallible;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use ticket_primitives::{ErrorKind, UnixTime};
use warp::Filter;

use crate::error::ApiRejection;
use crate::state::AppState;

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
	warp::any().map(move || state.clone())
}

#[derive(Debug, Deserialize)]
struct BloomQuery {
	since: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BloomSnapshotResponse {
	version: u64,
	built_at: UnixTime,
	coverage_window_secs: i64,
	m: u64,
	k: u32,
	expected_n: u64,
	bits_base64: String,
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
	warp::path!("v1" / "bloom")
		.and(warp::get())
		.and(warp::query::<BloomQuery>())
		.and(with_state(state))
		.and_then(get_bloom)
}

async fn get_bloom(query: BloomQuery, state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
	let snapshot = state
		.ledger
		.latest_bloom_snapshot()
		.map_err(|_| ApiRejection::reject(ErrorKind::LedgerUnavailable, "ledger unavailable"))?
		.ok_or_else(|| ApiRejection::reject(ErrorKind::BadRequest, "no bloom snapshot has been published yet"))?;

	if let Some(since) = query.since {
		if snapshot.version <= since {
			return Ok(warp::reply::with_status(warp::reply::json(&()), warp::http::StatusCode::NOT_MODIFIED));
		}
	}

	let response = BloomSnapshotResponse {
		version: snapshot.version,
		built_at: snapshot.built_at,
		coverage_window_secs: snapshot.coverage_window_secs,
		m: snapshot.m,
		k: snapshot.k,
		expected_n: snapshot.expected_n,
		bits_base64: base64::engine::general_purpose::STANDARD.encode(&snapshot.bits),
	};
	Ok(warp::reply::with_status(warp::reply::json(&response), warp::http::StatusCode::OK))
}
