//! The HTTP error boundary, following `common::api`'s `ResponseError` +
//! `handle_rejection` pattern: every handler returns `Result<impl Reply,
//! Rejection>`, rejecting with an [`ApiRejection`] that already carries the
//! wire-level [`ErrorKind`]; one top-level `recover` turns that into the
//! `{error: {kind, message, retriable}}` envelope (§6) for every route.

use ticket_primitives::{ErrorEnvelope, ErrorKind};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

#[derive(Debug)]
pub struct ApiRejection {
	pub kind: ErrorKind,
	pub message: String,
}

impl ApiRejection {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		ApiRejection { kind, message: message.into() }
	}

	pub fn reject(kind: ErrorKind, message: impl Into<String>) -> Rejection {
		warp::reject::custom(ApiRejection::new(kind, message))
	}
}

impl warp::reject::Reject for ApiRejection {}

fn status_for(kind: ErrorKind) -> StatusCode {
	match kind {
		ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
		ErrorKind::Unauthorised => StatusCode::UNAUTHORIZED,
		ErrorKind::ReceiptUnverified => StatusCode::PAYMENT_REQUIRED,
		ErrorKind::ReceiptAlreadyConsumed => StatusCode::CONFLICT,
		ErrorKind::UnknownKey | ErrorKind::KeyRevoked => StatusCode::NOT_FOUND,
		ErrorKind::BadSignature => StatusCode::FORBIDDEN,
		ErrorKind::Expired | ErrorKind::NotYetValid => StatusCode::FORBIDDEN,
		ErrorKind::Revoked | ErrorKind::DoubleSpend => StatusCode::CONFLICT,
		ErrorKind::RateLimitExceeded | ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
		ErrorKind::HsmUnavailable | ErrorKind::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
		ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

/// Recovers every [`Rejection`] this service can produce — ours, and warp's
/// own (body parse failures, missing routes) — into the wire envelope so a
/// validator never has to special-case a bare 404/400 from warp itself.
pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, std::convert::Infallible> {
	let (kind, message) = if let Some(api) = rejection.find::<ApiRejection>() {
		(api.kind, api.message.clone())
	} else if rejection.is_not_found() {
		(ErrorKind::BadRequest, "no such route".to_string())
	} else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
		(ErrorKind::BadRequest, "malformed request body".to_string())
	} else if rejection.find::<warp::reject::MissingHeader>().is_some()
		|| rejection.find::<warp::reject::InvalidHeader>().is_some()
	{
		(ErrorKind::Unauthorised, "missing or invalid authorization".to_string())
	} else {
		tracing::error!(?rejection, "unhandled rejection");
		(ErrorKind::Internal, "internal error".to_string())
	};

	let envelope = ErrorEnvelope::new(kind, message);
	Ok(warp::reply::with_status(warp::reply::json(&envelope), status_for(kind)))
}
