//! `GET /keys/public` (§6): the Key Registry's currently known keys, in the
//! shape a Validator Runtime caches verbatim into its local store (§4.7).

use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use ticket_primitives::{KeyId, KeyStatus, UnixTime};
use warp::Filter;

use crate::error::ApiRejection;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyEntry {
	key_id: KeyId,
	public_key_pem: String,
	activates_at: UnixTime,
	expires_at: UnixTime,
	status: KeyStatus,
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
	warp::path!("v1" / "keys" / "public").and(warp::get()).and(with_state(state)).and_then(list_keys)
}

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
	warp::any().map(move || state.clone())
}

async fn list_keys(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
	let records = state
		.ledger
		.list_key_records()
		.map_err(|_| ApiRejection::reject(ticket_primitives::ErrorKind::LedgerUnavailable, "ledger unavailable"))?;

	let entries: Vec<PublicKeyEntry> = records
		.into_iter()
		.map(|r| PublicKeyEntry {
			key_id: r.key_id,
			public_key_pem: r.public_key_pem,
			activates_at: r.activates_at,
			expires_at: r.expires_at,
			status: r.status,
		})
		.collect();

	Ok(warp::reply::json(&entries))
}
