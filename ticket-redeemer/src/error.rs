use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
	#[error("signature verification failed")]
	BadSignature,
	#[error("ticket has been revoked")]
	Revoked,
	#[error("ticket has expired")]
	Expired,
	#[error("ticket is not yet valid")]
	NotYetValid,
	#[error("ticket has already been redeemed")]
	DoubleSpend,
	#[error("day-pass redemption limit exceeded")]
	RateLimitExceeded,
	#[error("unknown key")]
	UnknownKey,
	#[error("ledger unavailable")]
	LedgerUnavailable,
}
