use serde::{Deserialize, Serialize};

/// The wire-level error taxonomy from the spec (§7). Every component-level
/// `thiserror` enum maps into exactly one of these kinds; this is the type
/// the HTTP layer serializes into `{error: {kind, message, retriable}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	BadRequest,
	Unauthorised,
	ReceiptUnverified,
	ReceiptAlreadyConsumed,
	UnknownKey,
	KeyRevoked,
	BadSignature,
	Expired,
	NotYetValid,
	Revoked,
	DoubleSpend,
	RateLimitExceeded,
	HsmUnavailable,
	LedgerUnavailable,
	RateLimited,
	Internal,
}

impl ErrorKind {
	/// Whether the caller may retry the exact same request without having
	/// mutated any durable state. `double_spend` and `rate_limit_exceeded`
	/// are deliberately NOT retriable — the ticket (or day-pass redemption)
	/// is burned (§7).
	pub fn retriable(self) -> bool {
		matches!(self, ErrorKind::HsmUnavailable | ErrorKind::LedgerUnavailable | ErrorKind::RateLimited)
	}
}

/// The JSON error envelope returned on every non-2xx response (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
	pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	pub kind: ErrorKind,
	pub message: String,
	pub retriable: bool,
}

impl ErrorEnvelope {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		ErrorEnvelope { error: ErrorBody { kind, message: message.into(), retriable: kind.retriable() } }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn double_spend_and_rate_limit_exceeded_are_never_retriable() {
		assert!(!ErrorKind::DoubleSpend.retriable());
		assert!(!ErrorKind::RateLimitExceeded.retriable());
	}

	#[test]
	fn hsm_and_ledger_unavailable_are_retriable() {
		assert!(ErrorKind::HsmUnavailable.retriable());
		assert!(ErrorKind::LedgerUnavailable.retriable());
		assert!(ErrorKind::RateLimited.retriable());
	}
}
