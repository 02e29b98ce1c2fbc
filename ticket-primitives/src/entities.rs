//! Plain data-transfer types for the entities in the data model (§3). These
//! are shared by every component crate; only `ticket-ledger` knows how to
//! persist them.

use serde::{Deserialize, Serialize};

use crate::{ids::{KeyId, TicketHash, ValidatorId}, ticket::TicketKind, UnixTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
	Active,
	Retired,
	Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerKeyRecord {
	pub key_id: KeyId,
	/// PKCS#8 PEM encoding of the RSA public key.
	pub public_key_pem: String,
	pub activates_at: UnixTime,
	pub expires_at: UnixTime,
	pub status: KeyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
	Pending,
	Consumed,
	Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
	pub receipt_id: String,
	pub payment_provider: String,
	pub provider_receipt_id: String,
	pub amount: u64,
	pub currency: String,
	pub status: ReceiptStatus,
	pub created_at: UnixTime,
}

/// Recorded by the Issuer at sign time (§4.3 step 5). The final
/// [`TicketHash`] is not known yet — that's only established on first
/// redemption — so this slot is keyed by receipt, not by ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedTicketSlot {
	pub receipt_id: String,
	pub key_id: KeyId,
	pub ticket_kind: TicketKind,
	pub valid_from: UnixTime,
	pub valid_until: UnixTime,
	pub issued_at: UnixTime,
	/// SHA-256 of the blinded request, kept for audit correlation only; it
	/// does not identify the eventual ticket (§4.3 step 5).
	pub blinded_request_hash: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpentRecord {
	pub ticket_hash: TicketHash,
	pub first_validator_id: ValidatorId,
	pub first_seen_at: UnixTime,
	pub count: u32,
	pub last_seen_at: UnixTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineDecision {
	Accepted,
	DuplicateLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Pending,
	Synced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineValidation {
	pub local_id: String,
	pub validator_id: ValidatorId,
	pub ticket_hash: TicketHash,
	pub ticket_kind: TicketKind,
	pub observed_at: UnixTime,
	pub local_decision: OfflineDecision,
	pub sync_status: SyncStatus,
}

/// One redemption attempt seen by the Ledger for a given ticket, whether it
/// arrived via the online Redeemer or a synced offline batch. Not part of
/// the core data model in the spec's entity table; kept so the Reconciler
/// can recompute a day-pass ticket's rolling-window count from first
/// principles (§4.6 step 4) instead of trusting a running counter that a
/// retroactive offline observation could invalidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
	pub ticket_hash: TicketHash,
	pub validator_id: ValidatorId,
	pub local_id: String,
	pub observed_at: UnixTime,
}

/// The recorded outcome of a single `(validatorId, localId)` reconciliation
/// entry, persisted so a re-submitted batch (§4.6 "Idempotence") replays the
/// exact same acknowledgement instead of re-running fraud detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReconcileOutcome {
	Confirmed,
	Conflict(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedTicket {
	pub ticket_hash: TicketHash,
	pub revoked_at: UnixTime,
	pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomSnapshot {
	pub version: u64,
	pub built_at: UnixTime,
	pub coverage_window_secs: i64,
	pub m: u64,
	pub k: u32,
	pub expected_n: u64,
	pub bits: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
	pub ts: UnixTime,
	pub actor: String,
	pub kind: String,
	pub subject_hash: Option<String>,
	pub metadata: serde_json::Value,
}

impl AuditEvent {
	pub fn new(actor: impl Into<String>, kind: impl Into<String>) -> Self {
		AuditEvent {
			ts: crate::now_unix(),
			actor: actor.into(),
			kind: kind.into(),
			subject_hash: None,
			metadata: serde_json::Value::Null,
		}
	}

	pub fn with_subject(mut self, subject_hash: impl Into<String>) -> Self {
		self.subject_hash = Some(subject_hash.into());
		self
	}

	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = metadata;
		self
	}
}

/// Anything that can durably record an [`AuditEvent`]. Implemented by
/// `ticket-ledger`'s `Ledger`; kept as a trait here so crates that emit
/// audit events (the Blind Signer, the Key Registry) do not need to depend
/// on the Ledger's storage engine.
pub trait AuditSink: Send + Sync {
	fn record(&self, event: AuditEvent);
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
	fn record(&self, event: AuditEvent) {
		(**self).record(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn audit_event_builder_sets_optional_fields() {
		let event = AuditEvent::new("blind-signer", "sign_blinded")
			.with_subject("deadbeef")
			.with_metadata(serde_json::json!({"key_id": 1}));
		assert_eq!(event.actor, "blind-signer");
		assert_eq!(event.subject_hash.as_deref(), Some("deadbeef"));
	}
}
