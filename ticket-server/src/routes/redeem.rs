//! `POST /redeem` (§4.4, §6): the online validator path.

use std::convert::Infallible;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use ticket_primitives::{ErrorKind, KeyId, TicketKind, UnixTime, ValidatorId};
use ticket_redeemer::{RedeemDecision, RedeemError, RedeemRequest};
use warp::Filter;

use crate::error::ApiRejection;
use crate::state::AppState;

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
	warp::any().map(move || state.clone())
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
	warp::path!("v1" / "redeem").and(warp::post()).and(warp::body::json()).and(with_state(state)).and_then(redeem)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemWireRequest {
	ticket_id_base64: String,
	signature_base64: String,
	key_id: KeyId,
	validator_id: String,
	observed_at: UnixTime,
	claimed_kind: TicketKind,
	claimed_valid_from: UnixTime,
	claimed_valid_until: UnixTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RedeemWireResponse {
	decision: &'static str,
}

async fn redeem(request: RedeemWireRequest, state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
	let ticket_id = base64::engine::general_purpose::STANDARD
		.decode(&request.ticket_id_base64)
		.map_err(|_| ApiRejection::reject(ErrorKind::BadRequest, "ticketId must be base64"))?;
	let signature = base64::engine::general_purpose::STANDARD
		.decode(&request.signature_base64)
		.map_err(|_| ApiRejection::reject(ErrorKind::BadRequest, "signature must be base64"))?;

	let decision = state
		.redeemer
		.redeem(RedeemRequest {
			ticket_id,
			signature,
			key_id: request.key_id,
			validator_id: ValidatorId(request.validator_id),
			observed_at: request.observed_at,
			claimed_kind: request.claimed_kind,
			claimed_valid_from: request.claimed_valid_from,
			claimed_valid_until: request.claimed_valid_until,
		})
		.map_err(redeem_error_to_rejection)?;

	let decision = match decision {
		RedeemDecision::Accepted => "accepted",
		RedeemDecision::DoubleSpend => "double_spend",
	};
	Ok(warp::reply::json(&RedeemWireResponse { decision }))
}

fn redeem_error_to_rejection(error: RedeemError) -> warp::Rejection {
	let kind = match error {
		RedeemError::BadSignature => ErrorKind::BadSignature,
		RedeemError::Revoked => ErrorKind::Revoked,
		RedeemError::Expired => ErrorKind::Expired,
		RedeemError::NotYetValid => ErrorKind::NotYetValid,
		RedeemError::DoubleSpend => ErrorKind::DoubleSpend,
		RedeemError::RateLimitExceeded => ErrorKind::RateLimitExceeded,
		RedeemError::UnknownKey => ErrorKind::UnknownKey,
		RedeemError::LedgerUnavailable => ErrorKind::LedgerUnavailable,
	};
	ApiRejection::reject(kind, error.to_string())
}
