//! The Ledger: the single authority for every persistent entity in the
//! data model (§3). Owns the RocksDB [`Store`] and the one piece of
//! in-process coordination the protocol actually needs — a lock around the
//! check-then-write sequences that must be atomic (consuming a receipt,
//! first-spending a ticket) so two concurrent callers can never both win.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ticket_primitives::{
	now_unix, AuditEvent, AuditSink, BloomSnapshot, IssuedTicketSlot, IssuerKeyRecord, KeyId,
	KeyStatus, Observation, Receipt, ReceiptStatus, ReconcileOutcome, RevokedTicket, SpentRecord,
	TicketHash, UnixTime, ValidatorId,
};

use crate::error::LedgerError;
use crate::store::{
	Store, AUDIT_PREFIX, BLOOM_PREFIX, ISSUED_SLOT_PREFIX, KEY_RECORD_PREFIX, OBSERVATION_PREFIX,
	RECEIPT_INDEX_PREFIX, RECEIPT_PREFIX, RECONCILE_PREFIX, REVOKED_PREFIX, SPENT_PREFIX,
};

/// The outcome of attempting to record a ticket's first redemption.
#[derive(Debug, Clone)]
pub enum SpendOutcome {
	/// This call created the `SpentRecord`; the caller holds the first spend.
	FirstSpend(SpentRecord),
	/// A `SpentRecord` already existed; this is a double-spend.
	AlreadySpent(SpentRecord),
}

pub struct Ledger {
	store: Store,
	single_spend_lock: Mutex<()>,
	audit_seq: AtomicU64,
}

impl Ledger {
	pub fn open(db_path: &Path) -> Result<Self, LedgerError> {
		Ok(Ledger { store: Store::open(db_path)?, single_spend_lock: Mutex::new(()), audit_seq: AtomicU64::new(0) })
	}

	// ---- Key Registry (§4.1) ----------------------------------------

	pub fn put_key_record(&self, record: &IssuerKeyRecord) -> Result<(), LedgerError> {
		self.store.put(KEY_RECORD_PREFIX, &record.key_id.0.to_be_bytes(), record)
	}

	pub fn get_key_record(&self, key_id: KeyId) -> Result<Option<IssuerKeyRecord>, LedgerError> {
		self.store.get(KEY_RECORD_PREFIX, &key_id.0.to_be_bytes())
	}

	pub fn list_key_records(&self) -> Result<Vec<IssuerKeyRecord>, LedgerError> {
		self.store.iter_prefix::<IssuerKeyRecord>(KEY_RECORD_PREFIX).map(|(_, v)| v).collect()
	}

	/// Implements the selection rule in §4.1: the active key with the
	/// latest `activatesAt <= now`. Returns whether the lead-time
	/// constraint (`expiresAt > now + minLeadTime`) was satisfied so the
	/// caller (the Issuer) can emit `key_lead_time_short` when it is not.
	pub fn current_signing_key(
		&self,
		now: UnixTime,
		min_lead_time: i64,
	) -> Result<Option<(IssuerKeyRecord, bool)>, LedgerError> {
		let mut candidates: Vec<IssuerKeyRecord> = self
			.list_key_records()?
			.into_iter()
			.filter(|k| k.status == KeyStatus::Active && k.activates_at <= now)
			.collect();
		candidates.sort_by_key(|k| k.activates_at);

		Ok(candidates.pop().map(|key| {
			let lead_time_ok = key.expires_at > now + min_lead_time;
			(key, lead_time_ok)
		}))
	}

	pub fn revoke_key(&self, key_id: KeyId) -> Result<(), LedgerError> {
		let mut record = self.get_key_record(key_id)?.ok_or(LedgerError::UnknownKey)?;
		record.status = KeyStatus::Revoked;
		self.put_key_record(&record)
	}

	pub fn retire_expired_keys(&self, now: UnixTime) -> Result<u32, LedgerError> {
		let mut retired = 0;
		for mut record in self.list_key_records()? {
			if record.status == KeyStatus::Active && record.expires_at <= now {
				record.status = KeyStatus::Retired;
				self.put_key_record(&record)?;
				retired += 1;
			}
		}
		Ok(retired)
	}

	// ---- Receipts & issuance (§4.3) ----------------------------------

	fn receipt_index_key(provider: &str, provider_receipt_id: &str) -> Vec<u8> {
		[provider.as_bytes(), b"\0", provider_receipt_id.as_bytes()].concat()
	}

	/// Inserts a brand-new, `pending` receipt. Fails with
	/// [`LedgerError::DuplicateReceipt`] if `(paymentProvider,
	/// providerReceiptId)` has already been recorded, enforcing the
	/// uniqueness invariant in §3.
	pub fn create_receipt(&self, receipt: &Receipt) -> Result<(), LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		let index_key = Self::receipt_index_key(&receipt.payment_provider, &receipt.provider_receipt_id);
		if self.store.get::<String>(RECEIPT_INDEX_PREFIX, &index_key)?.is_some() {
			return Err(LedgerError::DuplicateReceipt);
		}
		let mut batch = self.store.write_batch();
		batch.put(RECEIPT_PREFIX, receipt.receipt_id.as_bytes(), receipt)?;
		batch.put(RECEIPT_INDEX_PREFIX, &index_key, &receipt.receipt_id)?;
		batch.commit()
	}

	pub fn get_receipt(&self, receipt_id: &str) -> Result<Option<Receipt>, LedgerError> {
		self.store.get(RECEIPT_PREFIX, receipt_id.as_bytes())
	}

	pub fn get_receipt_by_provider(
		&self,
		provider: &str,
		provider_receipt_id: &str,
	) -> Result<Option<Receipt>, LedgerError> {
		let index_key = Self::receipt_index_key(provider, provider_receipt_id);
		match self.store.get::<String>(RECEIPT_INDEX_PREFIX, &index_key)? {
			Some(receipt_id) => self.get_receipt(&receipt_id),
			None => Ok(None),
		}
	}

	/// Atomically marks a `pending` receipt `consumed` and writes the
	/// [`IssuedTicketSlot`] produced by a successful sign (§4.3 step 5).
	/// Returns [`LedgerError::ReceiptAlreadyConsumed`] if the receipt was
	/// not `pending` — the caller must treat this as `receipt_already_consumed`.
	pub fn consume_receipt_and_issue_slot(
		&self,
		receipt_id: &str,
		slot: IssuedTicketSlot,
	) -> Result<(), LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		let mut receipt = self.get_receipt(receipt_id)?.ok_or(LedgerError::ReceiptNotFound)?;
		if receipt.status != ReceiptStatus::Pending {
			return Err(LedgerError::ReceiptAlreadyConsumed);
		}
		receipt.status = ReceiptStatus::Consumed;

		let mut batch = self.store.write_batch();
		batch.put(RECEIPT_PREFIX, receipt_id.as_bytes(), &receipt)?;
		batch.put(ISSUED_SLOT_PREFIX, receipt_id.as_bytes(), &slot)?;
		batch.commit()
	}

	// ---- Redemption & single-spend (§4.4) ----------------------------

	/// The atomic insert-or-read primitive the Redeemer relies on for
	/// single-use tickets: the first caller to reach this for a given
	/// `ticketHash` creates the `SpentRecord`; everyone else sees it.
	pub fn record_single_spend(
		&self,
		ticket_hash: TicketHash,
		validator_id: &ValidatorId,
		now: UnixTime,
	) -> Result<SpendOutcome, LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		let key = ticket_hash.0;
		if let Some(existing) = self.store.get::<SpentRecord>(SPENT_PREFIX, &key)? {
			return Ok(SpendOutcome::AlreadySpent(existing));
		}
		let record = SpentRecord {
			ticket_hash,
			first_validator_id: validator_id.clone(),
			first_seen_at: now,
			count: 1,
			last_seen_at: now,
		};
		self.store.put(SPENT_PREFIX, &key, &record)?;
		Ok(SpendOutcome::FirstSpend(record))
	}

	/// Increments the redemption count for a day-pass ticket, creating the
	/// `SpentRecord` on first use. If the existing record's window (anchored
	/// at `firstSeenAt`) has expired, it rolls over into a fresh window
	/// rather than accumulating forever. Rate-limit enforcement (comparing
	/// the returned `count` against the configured max) is the Redeemer's
	/// job, not the Ledger's — this call always succeeds and always
	/// records the attempt.
	pub fn record_day_pass_spend(
		&self,
		ticket_hash: TicketHash,
		validator_id: &ValidatorId,
		now: UnixTime,
		window_secs: i64,
	) -> Result<SpentRecord, LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		let key = ticket_hash.0;
		let record = match self.store.get::<SpentRecord>(SPENT_PREFIX, &key)? {
			Some(mut existing) if now - existing.first_seen_at < window_secs => {
				existing.count += 1;
				existing.last_seen_at = now;
				existing
			},
			_ => SpentRecord {
				ticket_hash,
				first_validator_id: validator_id.clone(),
				first_seen_at: now,
				count: 1,
				last_seen_at: now,
			},
		};
		self.store.put(SPENT_PREFIX, &key, &record)?;
		Ok(record)
	}

	pub fn get_spent_record(&self, ticket_hash: TicketHash) -> Result<Option<SpentRecord>, LedgerError> {
		self.store.get(SPENT_PREFIX, &ticket_hash.0)
	}

	/// Overwrites the `firstValidatorId`/`firstSeenAt` of an existing
	/// `SpentRecord` when the Reconciler discovers an earlier offline
	/// observation (the resolved Open Question in §9: the earliest
	/// timestamp always wins attribution, regardless of arrival order).
	pub fn supersede_first_spend(
		&self,
		ticket_hash: TicketHash,
		earlier_validator_id: &ValidatorId,
		earlier_seen_at: UnixTime,
	) -> Result<(), LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		let mut record = self.get_spent_record(ticket_hash)?.unwrap_or(SpentRecord {
			ticket_hash,
			first_validator_id: earlier_validator_id.clone(),
			first_seen_at: earlier_seen_at,
			count: 1,
			last_seen_at: earlier_seen_at,
		});
		if earlier_seen_at < record.first_seen_at {
			record.first_validator_id = earlier_validator_id.clone();
			record.first_seen_at = earlier_seen_at;
		}
		self.store.put(SPENT_PREFIX, &ticket_hash.0, &record)
	}

	/// Overwrites a `SpentRecord` wholesale. Used by the Reconciler once it
	/// has recomputed a day-pass ticket's window anchor and count from the
	/// full observation log (§4.6 step 4) rather than trusting the
	/// incrementing counter `record_day_pass_spend` maintains for the fast
	/// online path.
	pub fn put_spent_record(&self, record: &SpentRecord) -> Result<(), LedgerError> {
		let _guard = self.single_spend_lock.lock().unwrap();
		self.store.put(SPENT_PREFIX, &record.ticket_hash.0, record)
	}

	/// Appends one redemption attempt to the durable observation log for
	/// `ticket_hash` (§4.6 step 4's "all known observations").
	pub fn record_observation(
		&self,
		ticket_hash: TicketHash,
		validator_id: &ValidatorId,
		local_id: &str,
		observed_at: UnixTime,
	) -> Result<(), LedgerError> {
		let mut key = ticket_hash.0.to_vec();
		key.extend_from_slice(validator_id.0.as_bytes());
		key.push(0);
		key.extend_from_slice(local_id.as_bytes());
		let observation =
			Observation { ticket_hash, validator_id: validator_id.clone(), local_id: local_id.to_string(), observed_at };
		self.store.put(OBSERVATION_PREFIX, &key, &observation)
	}

	pub fn observations_for(&self, ticket_hash: TicketHash) -> Result<Vec<Observation>, LedgerError> {
		self.store
			.iter_prefix::<Observation>(OBSERVATION_PREFIX)
			.filter(|(key, _)| key.starts_with(&ticket_hash.0))
			.map(|(_, v)| v)
			.collect()
	}

	/// Idempotency guard for `sync_offline` (§4.6 "Idempotence"): whether
	/// `(validatorId, localId)` has already been processed, and if so, what
	/// it resolved to, so a re-submitted batch replays the exact same
	/// acknowledgement/conflict set instead of re-running fraud detection.
	fn reconcile_key(validator_id: &ValidatorId, local_id: &str) -> Vec<u8> {
		[validator_id.0.as_bytes(), b"\0", local_id.as_bytes()].concat()
	}

	pub fn get_reconciled_entry(
		&self,
		validator_id: &ValidatorId,
		local_id: &str,
	) -> Result<Option<ReconcileOutcome>, LedgerError> {
		self.store.get(RECONCILE_PREFIX, &Self::reconcile_key(validator_id, local_id))
	}

	pub fn record_reconciled_entry(
		&self,
		validator_id: &ValidatorId,
		local_id: &str,
		outcome: &ReconcileOutcome,
	) -> Result<(), LedgerError> {
		self.store.put(RECONCILE_PREFIX, &Self::reconcile_key(validator_id, local_id), outcome)
	}

	pub fn spent_records_since(&self, since: UnixTime) -> Result<Vec<SpentRecord>, LedgerError> {
		let records: Vec<SpentRecord> =
			self.store.iter_prefix::<SpentRecord>(SPENT_PREFIX).map(|(_, v)| v).collect::<Result<Vec<_>, _>>()?;
		Ok(records.into_iter().filter(|r| r.first_seen_at >= since).collect())
	}

	pub fn is_revoked(&self, ticket_hash: TicketHash) -> Result<bool, LedgerError> {
		Ok(self.store.get::<RevokedTicket>(REVOKED_PREFIX, &ticket_hash.0)?.is_some())
	}

	pub fn revoke_ticket(&self, ticket_hash: TicketHash, reason: impl Into<String>) -> Result<(), LedgerError> {
		let record = RevokedTicket { ticket_hash, revoked_at: now_unix(), reason: reason.into() };
		self.store.put(REVOKED_PREFIX, &ticket_hash.0, &record)
	}

	// ---- Bloom snapshots (§4.5) --------------------------------------

	pub fn put_bloom_snapshot(&self, snapshot: &BloomSnapshot) -> Result<(), LedgerError> {
		self.store.put(BLOOM_PREFIX, &snapshot.version.to_be_bytes(), snapshot)
	}

	pub fn get_bloom_snapshot(&self, version: u64) -> Result<Option<BloomSnapshot>, LedgerError> {
		self.store.get(BLOOM_PREFIX, &version.to_be_bytes())
	}

	pub fn latest_bloom_snapshot(&self) -> Result<Option<BloomSnapshot>, LedgerError> {
		let mut snapshots: Vec<BloomSnapshot> =
			self.store.iter_prefix::<BloomSnapshot>(BLOOM_PREFIX).map(|(_, v)| v).collect::<Result<_, _>>()?;
		snapshots.sort_by_key(|s| s.version);
		Ok(snapshots.pop())
	}

	pub fn prune_bloom_snapshots_before(&self, min_version: u64) -> Result<u32, LedgerError> {
		let mut pruned = 0;
		for (key, snapshot) in self.store.iter_prefix::<BloomSnapshot>(BLOOM_PREFIX) {
			if snapshot?.version < min_version {
				self.store.delete(BLOOM_PREFIX, &key)?;
				pruned += 1;
			}
		}
		Ok(pruned)
	}

	/// Storage hygiene for the Reconciler's background catch-up sweep (§5A):
	/// an observation older than `before` can no longer fall inside any
	/// future day-pass window recount (§4.6 step 4), so it is safe to drop.
	pub fn prune_observations_before(&self, before: UnixTime) -> Result<u32, LedgerError> {
		let mut pruned = 0;
		for (key, observation) in self.store.iter_prefix::<Observation>(OBSERVATION_PREFIX) {
			if observation?.observed_at < before {
				self.store.delete(OBSERVATION_PREFIX, &key)?;
				pruned += 1;
			}
		}
		Ok(pruned)
	}
}

impl AuditSink for Ledger {
	fn record(&self, event: AuditEvent) {
		let seq = self.audit_seq.fetch_add(1, Ordering::Relaxed);
		let mut key = (event.ts.max(0) as u64).to_be_bytes().to_vec();
		key.extend_from_slice(&seq.to_be_bytes());
		if let Err(error) = self.store.put(AUDIT_PREFIX, &key, &event) {
			tracing::error!(%error, "failed to persist audit event");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn open_ledger() -> (tempfile::TempDir, Ledger) {
		let (dir, db_path) = utilities::testing::new_temp_directory_with_nonexistent_file();
		let ledger = Ledger::open(&db_path).unwrap();
		(dir, ledger)
	}

	fn key_record(key_id: u32, activates_at: i64, expires_at: i64) -> IssuerKeyRecord {
		IssuerKeyRecord {
			key_id: KeyId(key_id),
			public_key_pem: "pem".to_string(),
			activates_at,
			expires_at,
			status: KeyStatus::Active,
		}
	}

	#[test]
	fn current_signing_key_picks_latest_activated_active_key() {
		let (_dir, ledger) = open_ledger();
		ledger.put_key_record(&key_record(1, 0, 1_000_000)).unwrap();
		ledger.put_key_record(&key_record(2, 100, 1_000_000)).unwrap();

		let (key, lead_time_ok) = ledger.current_signing_key(500, 3600).unwrap().unwrap();
		assert_eq!(key.key_id, KeyId(2));
		assert!(lead_time_ok);
	}

	#[test]
	fn current_signing_key_flags_short_lead_time() {
		let (_dir, ledger) = open_ledger();
		ledger.put_key_record(&key_record(1, 0, 1_000)).unwrap();

		let (_key, lead_time_ok) = ledger.current_signing_key(900, 3600).unwrap().unwrap();
		assert!(!lead_time_ok);
	}

	#[test]
	fn duplicate_receipt_is_rejected() {
		let (_dir, ledger) = open_ledger();
		let receipt = Receipt {
			receipt_id: "r1".into(),
			payment_provider: "stripe".into(),
			provider_receipt_id: "pi_123".into(),
			amount: 250,
			currency: "USD".into(),
			status: ReceiptStatus::Pending,
			created_at: 0,
		};
		ledger.create_receipt(&receipt).unwrap();
		let result = ledger.create_receipt(&receipt);
		assert!(matches!(result, Err(LedgerError::DuplicateReceipt)));
	}

	#[test]
	fn only_the_first_redemption_of_a_single_ticket_wins() {
		let (_dir, ledger) = open_ledger();
		let hash = TicketHash::of(b"ticket-1");
		let a = ValidatorId("validator-a".into());
		let b = ValidatorId("validator-b".into());

		let first = ledger.record_single_spend(hash, &a, 100).unwrap();
		assert!(matches!(first, SpendOutcome::FirstSpend(_)));

		let second = ledger.record_single_spend(hash, &b, 150).unwrap();
		match second {
			SpendOutcome::AlreadySpent(record) => assert_eq!(record.first_validator_id, a),
			_ => panic!("expected AlreadySpent"),
		}
	}

	#[test]
	fn supersede_first_spend_only_moves_attribution_earlier() {
		let (_dir, ledger) = open_ledger();
		let hash = TicketHash::of(b"ticket-1");
		let online = ValidatorId("online".into());
		let offline = ValidatorId("offline".into());

		ledger.record_single_spend(hash, &online, 200).unwrap();
		ledger.supersede_first_spend(hash, &offline, 100).unwrap();

		let record = ledger.get_spent_record(hash).unwrap().unwrap();
		assert_eq!(record.first_validator_id, offline);
		assert_eq!(record.first_seen_at, 100);

		// A later "earlier" observation must not move attribution back.
		ledger.supersede_first_spend(hash, &online, 150).unwrap();
		let record = ledger.get_spent_record(hash).unwrap().unwrap();
		assert_eq!(record.first_validator_id, offline);
	}
}
