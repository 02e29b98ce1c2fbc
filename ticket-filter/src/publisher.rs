//! Builds and publishes [`BloomSnapshot`]s from the Ledger's spent-ticket
//! history (§4.5). The actual timer loop (`publishInterval`) lives in the
//! server binary; this module is just "build one snapshot right now" plus
//! version bookkeeping, so it can be called on a schedule or on demand.

use std::sync::Arc;

use ticket_ledger::Ledger;
use ticket_primitives::{now_unix, BloomSnapshot};

use crate::bloom::{derive_parameters, BloomFilter};

pub struct FilterPublisherConfig {
	pub target_fpr: f64,
	pub coverage_window_secs: i64,
	/// How many past snapshot versions to keep around for validators that
	/// haven't polled in a while (§3 `BloomSnapshot`: "retrievable for at
	/// most a short retention window").
	pub retained_versions: u64,
}

impl Default for FilterPublisherConfig {
	fn default() -> Self {
		FilterPublisherConfig {
			target_fpr: crate::bloom::DEFAULT_TARGET_FPR,
			coverage_window_secs: 48 * 3600,
			retained_versions: 12,
		}
	}
}

pub struct FilterPublisher {
	ledger: Arc<Ledger>,
	config: FilterPublisherConfig,
}

impl FilterPublisher {
	pub fn new(ledger: Arc<Ledger>, config: FilterPublisherConfig) -> Self {
		FilterPublisher { ledger, config }
	}

	/// Builds a fresh [`BloomSnapshot`] over every ticket first-spent within
	/// the coverage window, persists it with a strictly increasing
	/// version, and prunes snapshots older than the retention window.
	#[tracing::instrument(skip(self))]
    pub fn publish_snapshot(&self) -> anyhow::Result<BloomSnapshot> {
		let now = now_unix();
		let since = now - self.config.coverage_window_secs;
		let spent = self.ledger.spent_records_since(since)?;

		let (m, k) = derive_parameters(spent.len() as u64, self.config.target_fpr);
		let mut filter = BloomFilter::new(m, k);
		for record in &spent {
			filter.insert(&record.ticket_hash);
		}

		let previous_version = self.ledger.latest_bloom_snapshot()?.map(|s| s.version).unwrap_or(0);
		let snapshot = BloomSnapshot {
			version: previous_version + 1,
			built_at: now,
			coverage_window_secs: self.config.coverage_window_secs,
			m,
			k,
			expected_n: spent.len() as u64,
			bits: filter.into_bytes(),
		};

		self.ledger.put_bloom_snapshot(&snapshot)?;
		if snapshot.version > self.config.retained_versions {
			let pruned = self.ledger.prune_bloom_snapshots_before(snapshot.version - self.config.retained_versions)?;
			if pruned > 0 {
				tracing::debug!(pruned, "pruned stale bloom snapshots");
			}
		}

		Ok(snapshot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ticket_primitives::{TicketHash, ValidatorId};

	#[test]
	fn published_snapshot_contains_recent_spends_and_has_increasing_versions() {
		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(Ledger::open(&dir.path().join("db")).unwrap());
		let validator = ValidatorId("v1".into());
		let hash = TicketHash::of(b"ticket-1");
		ledger.record_single_spend(hash, &validator, now_unix()).unwrap();

		let publisher = FilterPublisher::new(ledger, FilterPublisherConfig::default());
		let first = publisher.publish_snapshot().unwrap();
		assert_eq!(first.version, 1);

		let restored = crate::bloom::BloomFilter::from_bytes(first.bits.clone(), first.m, first.k);
		assert!(restored.contains(&hash));

		let second = publisher.publish_snapshot().unwrap();
		assert_eq!(second.version, 2);
	}
}
