//! The Reconciler (§4.6): merges a validator's deferred offline decisions
//! back into the authoritative Ledger and surfaces conflicts as fraud
//! events. Runs both inline on `POST /sync_offline` and as a background
//! catch-up sweep (§5A); this module is the shared algorithm either caller
//! drives.

use std::collections::HashSet;
use std::sync::Arc;

use ticket_ledger::{Ledger, SpendOutcome};
use ticket_primitives::{
	AuditEvent, AuditSink, OfflineDecision, ReconcileOutcome, TicketHash, TicketKind, UnixTime,
	ValidatorId,
};

use crate::error::ReconcileError;

pub struct ReconcilerConfig {
	pub day_pass_max_redemptions: u32,
	pub day_pass_window_secs: i64,
	/// `reconcileBatchMax` (§6, default 10,000).
	pub batch_max: usize,
}

impl Default for ReconcilerConfig {
	fn default() -> Self {
		ReconcilerConfig { day_pass_max_redemptions: 20, day_pass_window_secs: 24 * 3600, batch_max: 10_000 }
	}
}

/// One entry from a validator's offline queue (§3 `OfflineValidation`),
/// as submitted to `POST /sync_offline` (§6).
#[derive(Debug, Clone)]
pub struct OfflineEntry {
	pub local_id: String,
	pub ticket_hash: TicketHash,
	pub observed_at: UnixTime,
	pub local_decision: OfflineDecision,
	pub claimed_kind: TicketKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConflict {
	pub local_id: String,
	pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResponse {
	pub ack_ids: Vec<String>,
	pub conflicts: Vec<ReconcileConflict>,
}

pub struct Reconciler {
	ledger: Arc<Ledger>,
	config: ReconcilerConfig,
}

impl Reconciler {
	pub fn new(ledger: Arc<Ledger>, config: ReconcilerConfig) -> Self {
		Reconciler { ledger, config }
	}

	/// `POST /sync_offline` (§4.6, §6). Idempotent: re-submitting the same
	/// batch replays the same acknowledgement/conflict set without mutating
	/// the Ledger again (§4.6 "Idempotence").
	#[tracing::instrument(skip(self, entries), fields(validator_id = %validator_id, n = entries.len()))]
	pub fn reconcile_batch(
		&self,
		validator_id: &ValidatorId,
		entries: Vec<OfflineEntry>,
	) -> Result<ReconcileResponse, ReconcileError> {
		if entries.len() > self.config.batch_max {
			return Err(ReconcileError::BatchTooLarge);
		}

		let mut response = ReconcileResponse::default();
		let mut seen_in_batch = HashSet::new();

		for entry in entries {
			// Dedupe by (validatorId, localId) (§4.6 step 1), both within
			// this batch and against everything ever processed for this
			// validator.
			if !seen_in_batch.insert(entry.local_id.clone()) {
				continue;
			}

			if let Some(outcome) = self
				.ledger
				.get_reconciled_entry(validator_id, &entry.local_id)
				.map_err(|_| ReconcileError::LedgerUnavailable)?
			{
				Self::apply_outcome(&mut response, entry.local_id, outcome);
				continue;
			}

			// Validators only ever enqueue their own `accepted`/`duplicateLocal`
			// decisions; a local `duplicateLocal` still gets reconciled so the
			// Ledger's observation log (day-pass recount) and fraud detection
			// see it, but it can never itself win first-spend attribution.
			let outcome = self.process_entry(validator_id, &entry)?;
			self.ledger.record(
				AuditEvent::new(validator_id.0.clone(), "sync_offline")
					.with_subject(entry.ticket_hash.to_hex())
					.with_metadata(serde_json::json!({
						"local_id": entry.local_id,
						"local_decision": entry.local_decision,
						"outcome": match &outcome {
							ReconcileOutcome::Confirmed => "confirmed",
							ReconcileOutcome::Conflict(reason) => reason.as_str(),
						},
					})),
			);
			self.ledger
				.record_reconciled_entry(validator_id, &entry.local_id, &outcome)
				.map_err(|_| ReconcileError::LedgerUnavailable)?;
			Self::apply_outcome(&mut response, entry.local_id, outcome);
		}

		Ok(response)
	}

	fn apply_outcome(response: &mut ReconcileResponse, local_id: String, outcome: ReconcileOutcome) {
		match outcome {
			ReconcileOutcome::Confirmed => response.ack_ids.push(local_id),
			ReconcileOutcome::Conflict(reason) => response.conflicts.push(ReconcileConflict { local_id, reason }),
		}
	}

	fn process_entry(
		&self,
		validator_id: &ValidatorId,
		entry: &OfflineEntry,
	) -> Result<ReconcileOutcome, ReconcileError> {
		match entry.claimed_kind {
			TicketKind::Single => self.process_single(validator_id, entry),
			TicketKind::DayPass => self.process_day_pass(validator_id, entry),
		}
	}

	/// §4.6 steps 2-3: the insert-or-compare primitive, specialised to
	/// single-use tickets where a second acceptance is definitionally a
	/// double-spend (the alternative reading — applying this conflict logic
	/// to day-pass tickets too, where repeat acceptance within the window is
	/// normal — would reject every legitimate day-pass ride after the
	/// first; see DESIGN.md).
	fn process_single(
		&self,
		validator_id: &ValidatorId,
		entry: &OfflineEntry,
	) -> Result<ReconcileOutcome, ReconcileError> {
		let outcome = self
			.ledger
			.record_single_spend(entry.ticket_hash, validator_id, entry.observed_at)
			.map_err(|_| ReconcileError::LedgerUnavailable)?;

		match outcome {
			SpendOutcome::FirstSpend(_) => Ok(ReconcileOutcome::Confirmed),
			SpendOutcome::AlreadySpent(existing) => {
				if existing.first_validator_id == *validator_id && existing.first_seen_at == entry.observed_at {
					// Same validator replaying its own already-reconciled
					// observation (e.g. it also saw it online first).
					return Ok(ReconcileOutcome::Confirmed);
				}

				if existing.first_seen_at <= entry.observed_at {
					self.emit_fraud(
						"late_duplicate",
						entry.ticket_hash,
						serde_json::json!({
							"first_validator_id": existing.first_validator_id.0,
							"first_seen_at": existing.first_seen_at,
							"conflicting_validator_id": validator_id.0,
							"conflicting_observed_at": entry.observed_at,
						}),
					);
					Ok(ReconcileOutcome::Conflict("late_duplicate".to_string()))
				} else {
					// The offline record is retroactively first (§9 Open
					// Question: attribution moves to the earlier observer).
					self.ledger
						.supersede_first_spend(entry.ticket_hash, validator_id, entry.observed_at)
						.map_err(|_| ReconcileError::LedgerUnavailable)?;
					self.emit_fraud(
						"superseded_duplicate",
						entry.ticket_hash,
						serde_json::json!({
							"previous_validator_id": existing.first_validator_id.0,
							"previous_seen_at": existing.first_seen_at,
							"new_validator_id": validator_id.0,
							"new_seen_at": entry.observed_at,
						}),
					);
					Ok(ReconcileOutcome::Confirmed)
				}
			},
		}
	}

	/// §4.6 step 4: day-pass tickets recompute their count from the full
	/// observation log rather than trusting a running counter, so a
	/// retroactive offline observation can only ever push the count up, and
	/// the window is anchored at the earliest known `firstSeenAt` (§9 Open
	/// Question).
	fn process_day_pass(
		&self,
		validator_id: &ValidatorId,
		entry: &OfflineEntry,
	) -> Result<ReconcileOutcome, ReconcileError> {
		self.ledger
			.record_observation(entry.ticket_hash, validator_id, &entry.local_id, entry.observed_at)
			.map_err(|_| ReconcileError::LedgerUnavailable)?;

		let observations =
			self.ledger.observations_for(entry.ticket_hash).map_err(|_| ReconcileError::LedgerUnavailable)?;
		let earliest = observations.iter().map(|o| o.observed_at).min().unwrap_or(entry.observed_at);
		let window_end = earliest + self.config.day_pass_window_secs;
		let in_window: Vec<_> = observations.iter().filter(|o| o.observed_at < window_end).collect();
		let count = in_window.len() as u32;
		let last_seen_at = in_window.iter().map(|o| o.observed_at).max().unwrap_or(entry.observed_at);
		let first_validator = in_window
			.iter()
			.min_by_key(|o| o.observed_at)
			.map(|o| o.validator_id.clone())
			.unwrap_or_else(|| validator_id.clone());

		self.ledger
			.put_spent_record(&ticket_primitives::SpentRecord {
				ticket_hash: entry.ticket_hash,
				first_validator_id: first_validator,
				first_seen_at: earliest,
				count,
				last_seen_at,
			})
			.map_err(|_| ReconcileError::LedgerUnavailable)?;

		if count > self.config.day_pass_max_redemptions {
			self.emit_fraud(
				"day_pass_limit_exceeded",
				entry.ticket_hash,
				serde_json::json!({ "count": count, "limit": self.config.day_pass_max_redemptions }),
			);
		}

		// §4.6 step 4: never retroactively invalidates earlier accepted redemptions.
		Ok(ReconcileOutcome::Confirmed)
	}

	fn emit_fraud(&self, kind: &str, ticket_hash: TicketHash, metadata: serde_json::Value) {
		self.ledger.record(
			AuditEvent::new("reconciler", format!("fraud_{kind}"))
				.with_subject(ticket_hash.to_hex())
				.with_metadata(metadata),
		);
	}
}
