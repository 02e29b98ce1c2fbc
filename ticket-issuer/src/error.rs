use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssuerError {
	#[error("receipt is not verified")]
	ReceiptUnverified,
	#[error("receipt already consumed")]
	ReceiptAlreadyConsumed,
	#[error("requested ticket kind is not supported")]
	InvalidTicketKind,
	#[error("requested validity window is out of range")]
	ValidityOutOfRange,
	#[error("no active signing key covers the current time")]
	NoActiveSigningKey,
	#[error("signer temporarily unavailable")]
	HsmUnavailable,
	#[error("ledger temporarily unavailable")]
	LedgerUnavailable,
}
