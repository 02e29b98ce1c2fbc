use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
	#[error("batch exceeds the configured maximum size")]
	BatchTooLarge,
	#[error("ledger unavailable")]
	LedgerUnavailable,
}
