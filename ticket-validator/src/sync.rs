//! The sync half of the Validator Runtime (§4.7 "Sync"): draining the local
//! offline queue to the Reconciler and pulling down fresh Bloom snapshots.
//! Both are expressed as traits so this crate never depends on how the
//! backend is actually reached — an HTTP client sits behind these in
//! production, out of this repo's scope (§1 Non-goals).

use async_trait::async_trait;
use ticket_primitives::{BloomSnapshot, ValidatorId};
use ticket_reconciler::{OfflineEntry, ReconcileResponse};

use crate::error::SyncError;
use crate::runtime::ValidatorRuntime;

#[async_trait]
pub trait ReconcileClient: Send + Sync {
	async fn submit_batch(
		&self,
		validator_id: &ValidatorId,
		entries: Vec<OfflineEntry>,
	) -> Result<ReconcileResponse, SyncError>;
}

#[async_trait]
pub trait FilterSource: Send + Sync {
	/// Returns `None` when `since_version` is already current (mirrors
	/// `GET /bloom?since=` §6 returning 304-equivalent "nothing newer").
	async fn latest_snapshot(&self, since_version: Option<u64>) -> Result<Option<BloomSnapshot>, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
	pub submitted: usize,
	pub acknowledged: usize,
	pub conflicted: usize,
}

impl ValidatorRuntime {
	/// Drains the local offline queue to the Reconciler and clears whatever
	/// it acknowledges, whether as a confirmation or a flagged conflict —
	/// either way the entry has been durably reconciled and need not be
	/// resubmitted (§4.6 "Idempotence" makes a resubmit harmless anyway).
	pub async fn sync_offline(&self, client: &dyn ReconcileClient) -> Result<SyncSummary, SyncError> {
		let pending =
			self.store().pending_entries().map_err(|e| SyncError::Storage(e.to_string()))?;
		if pending.is_empty() {
			return Ok(SyncSummary { submitted: 0, acknowledged: 0, conflicted: 0 });
		}

		let entries: Vec<OfflineEntry> = pending
			.iter()
			.map(|p| OfflineEntry {
				local_id: p.local_id.clone(),
				ticket_hash: p.ticket_hash,
				observed_at: p.observed_at,
				local_decision: p.local_decision,
				claimed_kind: p.ticket_kind,
			})
			.collect();

		let response = client.submit_batch(self.validator_id(), entries).await?;

		let mut resolved: Vec<String> = response.ack_ids.clone();
		resolved.extend(response.conflicts.iter().map(|c| c.local_id.clone()));
		self.store().remove_entries(&resolved).map_err(|e| SyncError::Storage(e.to_string()))?;

		Ok(SyncSummary {
			submitted: pending.len(),
			acknowledged: response.ack_ids.len(),
			conflicted: response.conflicts.len(),
		})
	}

	/// Pulls and atomically applies a fresher Bloom snapshot if one exists.
	/// Returns whether the cache was actually updated.
	pub async fn poll_filter(&self, source: &dyn FilterSource) -> Result<bool, SyncError> {
		let since = self.cached_bloom_version();
		match source.latest_snapshot(since).await? {
			Some(snapshot) => {
				self.apply_bloom_snapshot(snapshot).map_err(|e| SyncError::Storage(e.to_string()))?;
				Ok(true)
			},
			None => Ok(false),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use rand::rngs::OsRng;
	use ticket_crypto::KeyMaterial;
	use ticket_ledger::Ledger;
	use ticket_primitives::{canonical_message, IssuerKeyRecord, KeyId, KeyStatus, TicketKind};
	use ticket_reconciler::{Reconciler, ReconcilerConfig};

	use super::*;
	use crate::runtime::ValidatorRuntimeConfig;

	struct InProcessReconciler(Arc<Reconciler>);

	#[async_trait]
	impl ReconcileClient for InProcessReconciler {
		async fn submit_batch(
			&self,
			validator_id: &ValidatorId,
			entries: Vec<OfflineEntry>,
		) -> Result<ReconcileResponse, SyncError> {
			self.0.reconcile_batch(validator_id, entries).map_err(|e| SyncError::ReconcilerUnavailable(e.to_string()))
		}
	}

	struct InProcessFilterSource(Arc<Ledger>);

	#[async_trait]
	impl FilterSource for InProcessFilterSource {
		async fn latest_snapshot(&self, since_version: Option<u64>) -> Result<Option<BloomSnapshot>, SyncError> {
			let latest = self
				.0
				.latest_bloom_snapshot()
				.map_err(|e| SyncError::FilterUnavailable(e.to_string()))?;
			Ok(latest.filter(|snapshot| since_version.map_or(true, |v| snapshot.version > v)))
		}
	}

	fn build_runtime() -> (ValidatorRuntime, KeyMaterial) {
		let mut rng = OsRng;
		let material = KeyMaterial::generate(1024, &mut rng).unwrap();
		let record = IssuerKeyRecord {
			key_id: KeyId(1),
			public_key_pem: material.public_key().to_pem().unwrap(),
			activates_at: 0,
			expires_at: 1_000_000,
			status: KeyStatus::Active,
		};
		let store = Arc::new(crate::store::LocalStore::open_in_memory().unwrap());
		store.put_keys(std::slice::from_ref(&record)).unwrap();
		let runtime = ValidatorRuntime::new(
			ValidatorId("validator-1".into()),
			store,
			ValidatorRuntimeConfig::default(),
		)
		.unwrap();
		(runtime, material)
	}

	#[tokio::test]
	async fn sync_drains_the_queue_and_applies_acks() {
		let (runtime, material) = build_runtime();
		let ticket_id = b"ticket-1".to_vec();
		let message = canonical_message(&ticket_id, 0, 100_000, TicketKind::Single, KeyId(1));
		let signature = material.sign_raw(&message);
		runtime
			.validate("local-1", &ticket_id, &signature, KeyId(1), TicketKind::Single, 0, 100_000, 500)
			.unwrap();
		assert_eq!(runtime.store().pending_entries().unwrap().len(), 1);

		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(Ledger::open(&dir.path().join("db")).unwrap());
		let reconciler = Arc::new(Reconciler::new(ledger, ReconcilerConfig::default()));
		let client = InProcessReconciler(reconciler);

		let summary = runtime.sync_offline(&client).await.unwrap();
		assert_eq!(summary.submitted, 1);
		assert_eq!(summary.acknowledged, 1);
		assert!(runtime.store().pending_entries().unwrap().is_empty());
	}

	#[tokio::test]
	async fn poll_filter_applies_a_newer_snapshot() {
		let (runtime, _material) = build_runtime();
		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(Ledger::open(&dir.path().join("db")).unwrap());

		let (m, k) = ticket_filter::derive_parameters(1, ticket_filter::DEFAULT_TARGET_FPR);
		let filter = ticket_filter::BloomFilter::new(m, k);
		let snapshot = BloomSnapshot { version: 1, built_at: 0, coverage_window_secs: 48 * 3600, m, k, expected_n: 1, bits: filter.into_bytes() };
		ledger.put_bloom_snapshot(&snapshot).unwrap();

		let source = InProcessFilterSource(ledger);
		let updated = runtime.poll_filter(&source).await.unwrap();
		assert!(updated);
		assert_eq!(runtime.cached_bloom_version(), Some(1));

		let updated_again = runtime.poll_filter(&source).await.unwrap();
		assert!(!updated_again);
	}
}
