pub mod entities;
pub mod error;
pub mod ids;
pub mod ticket;

pub use entities::{
	AuditEvent, AuditSink, BloomSnapshot, IssuedTicketSlot, IssuerKeyRecord, KeyStatus,
	Observation, OfflineDecision, OfflineValidation, Receipt, ReceiptStatus, ReconcileOutcome,
	RevokedTicket, SpentRecord, SyncStatus,
};
pub use error::{ErrorBody, ErrorEnvelope, ErrorKind};
pub use ids::{KeyId, TicketHash, ValidatorId};
pub use ticket::{canonical_message, TicketKind};

/// Unix timestamp, seconds. Chosen over `chrono::DateTime<Utc>` at the
/// wire/storage boundary because it is what the canonical signed message
/// uses (§9 Design Notes) and bincode/serde round-trip it without ambiguity.
pub type UnixTime = i64;

pub fn now_unix() -> UnixTime {
	chrono::Utc::now().timestamp()
}
