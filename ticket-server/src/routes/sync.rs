//! `POST /sync_offline` (§4.6, §6): the path a Validator Runtime uses to
//! flush its queue of [`OfflineValidation`](ticket_primitives::OfflineValidation)
//! entries back to the Reconciler.

use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ticket_primitives::{ErrorKind, OfflineDecision, TicketHash, TicketKind, ValidatorId};
use ticket_reconciler::{OfflineEntry, ReconcileError};
use warp::Filter;

use crate::error::ApiRejection;
use crate::state::AppState;

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
	warp::any().map(move || state.clone())
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
	warp::path!("v1" / "sync_offline")
		.and(warp::post())
		.and(warp::body::json())
		.and(with_state(state))
		.and_then(sync_offline)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfflineEntryWire {
	local_id: String,
	ticket_hash_hex: String,
	observed_at: i64,
	local_decision: OfflineDecision,
	claimed_kind: TicketKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncOfflineRequest {
	validator_id: String,
	entries: Vec<OfflineEntryWire>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileConflictWire {
	local_id: String,
	reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOfflineResponse {
	ack_ids: Vec<String>,
	conflicts: Vec<ReconcileConflictWire>,
}

async fn sync_offline(request: SyncOfflineRequest, state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
	let validator_id = ValidatorId(request.validator_id);

	let mut entries = Vec::with_capacity(request.entries.len());
	for wire in request.entries {
		let bytes = hex::decode(&wire.ticket_hash_hex)
			.map_err(|_| ApiRejection::reject(ErrorKind::BadRequest, "ticketHash must be hex"))?;
		let array: [u8; 32] = bytes
			.try_into()
			.map_err(|_| ApiRejection::reject(ErrorKind::BadRequest, "ticketHash must be 32 bytes"))?;
		entries.push(OfflineEntry {
			local_id: wire.local_id,
			ticket_hash: TicketHash(array),
			observed_at: wire.observed_at,
			local_decision: wire.local_decision,
			claimed_kind: wire.claimed_kind,
		});
	}

	let response = state
		.reconciler
		.reconcile_batch(&validator_id, entries)
		.map_err(reconcile_error_to_rejection)?;

	Ok(warp::reply::json(&SyncOfflineResponse {
		ack_ids: response.ack_ids,
		conflicts: response
			.conflicts
			.into_iter()
			.map(|c| ReconcileConflictWire { local_id: c.local_id, reason: c.reason })
			.collect(),
	}))
}

fn reconcile_error_to_rejection(error: ReconcileError) -> warp::Rejection {
	let kind = match error {
		ReconcileError::BatchTooLarge => ErrorKind::BadRequest,
		ReconcileError::LedgerUnavailable => ErrorKind::LedgerUnavailable,
	};
	ApiRejection::reject(kind, error.to_string())
}
