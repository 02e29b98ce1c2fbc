use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
	#[error("no active signing key covers the requested time")]
	NoActiveSigningKey,
	#[error("unknown key")]
	UnknownKey,
	#[error("receipt already consumed")]
	ReceiptAlreadyConsumed,
	#[error("receipt not found")]
	ReceiptNotFound,
	#[error("a receipt already exists for this (provider, providerReceiptId) pair")]
	DuplicateReceipt,
	#[error("storage engine error: {0}")]
	Storage(#[from] rocksdb::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] bincode::Error),
	#[error("storage unavailable: {0}")]
	Unavailable(String),
}
