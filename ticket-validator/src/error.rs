use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidatorError {
	#[error("validator runtime has no cached public keys or Bloom snapshot; refusing to operate")]
	Uninitialised,
	#[error("unknown or revoked signing key")]
	UnknownKey,
	#[error("signature verification failed")]
	BadSignature,
	#[error("ticket has expired")]
	Expired,
	#[error("ticket is not yet valid")]
	NotYetValid,
	#[error("ticket hash appears in the locally cached Bloom filter")]
	DuplicateLocal,
	#[error("local storage error: {0}")]
	Storage(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("reconciler unavailable: {0}")]
	ReconcilerUnavailable(String),
	#[error("filter publisher unavailable: {0}")]
	FilterUnavailable(String),
	#[error("local storage error: {0}")]
	Storage(String),
}
