//! The Validator Runtime (§4.7): embedded in each field device. Boots from
//! its local cache, verifies tickets entirely offline, and queues its
//! decisions for later sync. Single-threaded cooperative by design (§5):
//! one scan at a time; background sync is a separate concern driven through
//! [`crate::sync`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ticket_crypto::PublicKey;
use ticket_filter::BloomFilter;
use ticket_primitives::{
	canonical_message, BloomSnapshot, IssuerKeyRecord, KeyId, KeyStatus, OfflineDecision,
	OfflineValidation, SyncStatus, TicketHash, TicketKind, UnixTime, ValidatorId,
};

use crate::error::ValidatorError;
use crate::store::LocalStore;

struct CachedKey {
	public_key: PublicKey,
	status: KeyStatus,
	expires_at: UnixTime,
}

struct CachedBloom {
	version: u64,
	filter: BloomFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateOutcome {
	Accepted,
	DuplicateLocal,
}

pub struct ValidatorRuntimeConfig {
	/// `singleTicketClockSkew` (§6, default 120s), tolerated on both ends of
	/// a ticket's validity window per the device's own clock (§4.7 step 2).
	pub clock_skew_secs: i64,
}

impl Default for ValidatorRuntimeConfig {
	fn default() -> Self {
		ValidatorRuntimeConfig { clock_skew_secs: 120 }
	}
}

pub struct ValidatorRuntime {
	validator_id: ValidatorId,
	store: Arc<LocalStore>,
	config: ValidatorRuntimeConfig,
	keys: RwLock<HashMap<KeyId, CachedKey>>,
	bloom: RwLock<Option<CachedBloom>>,
}

impl ValidatorRuntime {
	/// Cold-start contract (§4.7): a cached public key set is non-negotiable
	/// — the device "must never accept a ticket without a verifiable public
	/// key" — so construction fails with [`ValidatorError::Uninitialised`]
	/// if the local store holds no keys yet. A missing Bloom snapshot is
	/// tolerated (duplicate detection degrades to "never seen locally"
	/// rather than refusing to operate), since the spec's hard requirement
	/// is specifically about signature verifiability.
	pub fn new(
		validator_id: ValidatorId,
		store: Arc<LocalStore>,
		config: ValidatorRuntimeConfig,
	) -> Result<Self, ValidatorError> {
		let records = store.load_keys().map_err(|e| ValidatorError::Storage(e.to_string()))?;
		if records.is_empty() {
			return Err(ValidatorError::Uninitialised);
		}

		let keys = Self::build_key_cache(&records)?;
		let bloom = store
			.load_bloom_snapshot()
			.map_err(|e| ValidatorError::Storage(e.to_string()))?
			.map(Self::build_bloom_cache)
			.transpose()?;

		Ok(ValidatorRuntime {
			validator_id,
			store,
			config,
			keys: RwLock::new(keys),
			bloom: RwLock::new(bloom),
		})
	}

	fn build_key_cache(records: &[IssuerKeyRecord]) -> Result<HashMap<KeyId, CachedKey>, ValidatorError> {
		let mut keys = HashMap::new();
		for record in records {
			let public_key =
				PublicKey::from_pem(&record.public_key_pem).map_err(|_| ValidatorError::UnknownKey)?;
			keys.insert(record.key_id, CachedKey { public_key, status: record.status, expires_at: record.expires_at });
		}
		Ok(keys)
	}

	fn build_bloom_cache(snapshot: BloomSnapshot) -> Result<CachedBloom, ValidatorError> {
		Ok(CachedBloom { version: snapshot.version, filter: BloomFilter::from_bytes(snapshot.bits, snapshot.m, snapshot.k) })
	}

	/// Atomically replaces the cached public key set (§5 "single writer,
	/// many readers... atomic swap of an immutable view").
	pub fn apply_key_set(&self, records: Vec<IssuerKeyRecord>) -> Result<(), ValidatorError> {
		self.store.put_keys(&records).map_err(|e| ValidatorError::Storage(e.to_string()))?;
		let keys = Self::build_key_cache(&records)?;
		*self.keys.write().unwrap() = keys;
		Ok(())
	}

	/// Atomically replaces the cached Bloom snapshot (§4.7 "apply new
	/// snapshot atomically (never leaves the runtime with a torn filter)"),
	/// but only if strictly newer than what's cached — `GET /bloom?since=`
	/// callers may otherwise race and apply a stale snapshot.
	pub fn apply_bloom_snapshot(&self, snapshot: BloomSnapshot) -> Result<(), ValidatorError> {
		if let Some(current) = self.bloom.read().unwrap().as_ref() {
			if snapshot.version <= current.version {
				return Ok(());
			}
		}
		self.store.put_bloom_snapshot(&snapshot).map_err(|e| ValidatorError::Storage(e.to_string()))?;
		let cached = Self::build_bloom_cache(snapshot)?;
		*self.bloom.write().unwrap() = Some(cached);
		Ok(())
	}

	pub fn cached_bloom_version(&self) -> Option<u64> {
		self.bloom.read().unwrap().as_ref().map(|b| b.version)
	}

	/// §4.7's four-step per-validation algorithm. Never talks to the
	/// network; everything it needs is already cached.
	#[tracing::instrument(skip(self, ticket_id, signature), fields(validator_id = %self.validator_id))]
	pub fn validate(
		&self,
		local_id: impl Into<String>,
		ticket_id: &[u8],
		signature: &[u8],
		key_id: KeyId,
		claimed_kind: TicketKind,
		claimed_valid_from: UnixTime,
		claimed_valid_until: UnixTime,
		observed_at: UnixTime,
	) -> Result<ValidateOutcome, ValidatorError> {
		let public_key = {
			let keys = self.keys.read().unwrap();
			let cached = keys.get(&key_id).ok_or(ValidatorError::UnknownKey)?;
			if cached.status == KeyStatus::Revoked {
				return Err(ValidatorError::UnknownKey);
			}
			cached.public_key.clone()
		};

		let message = canonical_message(ticket_id, claimed_valid_from, claimed_valid_until, claimed_kind, key_id);
		if !ticket_crypto::blind::verify(&message, signature, &public_key) {
			return Err(ValidatorError::BadSignature);
		}

		if observed_at < claimed_valid_from - self.config.clock_skew_secs {
			return Err(ValidatorError::NotYetValid);
		}
		if observed_at > claimed_valid_until + self.config.clock_skew_secs {
			return Err(ValidatorError::Expired);
		}

		let ticket_hash = TicketHash::of(ticket_id);
		let seen_locally = claimed_kind == TicketKind::Single
			&& self.bloom.read().unwrap().as_ref().is_some_and(|b| b.filter.contains(&ticket_hash));

		let (decision, result) = if seen_locally {
			(OfflineDecision::DuplicateLocal, Err(ValidatorError::DuplicateLocal))
		} else {
			(OfflineDecision::Accepted, Ok(ValidateOutcome::Accepted))
		};

		self.store
			.enqueue(&OfflineValidation {
				local_id: local_id.into(),
				validator_id: self.validator_id.clone(),
				ticket_hash,
				ticket_kind: claimed_kind,
				observed_at,
				local_decision: decision,
				sync_status: SyncStatus::Pending,
			})
			.map_err(|e| ValidatorError::Storage(e.to_string()))?;

		result
	}

	pub fn validator_id(&self) -> &ValidatorId {
		&self.validator_id
	}

	pub fn store(&self) -> &LocalStore {
		&self.store
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;
	use ticket_crypto::KeyMaterial;

	fn issue_key(key_id: KeyId, expires_at: i64) -> (KeyMaterial, IssuerKeyRecord) {
		let mut rng = OsRng;
		let material = KeyMaterial::generate(1024, &mut rng).unwrap();
		let record = IssuerKeyRecord {
			key_id,
			public_key_pem: material.public_key().to_pem().unwrap(),
			activates_at: 0,
			expires_at,
			status: KeyStatus::Active,
		};
		(material, record)
	}

	fn build_runtime(records: Vec<IssuerKeyRecord>) -> ValidatorRuntime {
		let store = Arc::new(LocalStore::open_in_memory().unwrap());
		store.put_keys(&records).unwrap();
		ValidatorRuntime::new(ValidatorId("v1".into()), store, ValidatorRuntimeConfig::default()).unwrap()
	}

	#[test]
	fn refuses_to_construct_without_any_cached_keys() {
		let store = Arc::new(LocalStore::open_in_memory().unwrap());
		let result = ValidatorRuntime::new(ValidatorId("v1".into()), store, ValidatorRuntimeConfig::default());
		assert!(matches!(result, Err(ValidatorError::Uninitialised)));
	}

	#[test]
	fn accepts_a_fresh_ticket_and_enqueues_it() {
		let (material, record) = issue_key(KeyId(1), 1_000_000);
		let runtime = build_runtime(vec![record]);

		let ticket_id = b"ticket-1".to_vec();
		let message = canonical_message(&ticket_id, 0, 100_000, TicketKind::Single, KeyId(1));
		let signature = material.sign_raw(&message);

		let outcome =
			runtime.validate("local-1", &ticket_id, &signature, KeyId(1), TicketKind::Single, 0, 100_000, 500).unwrap();
		assert_eq!(outcome, ValidateOutcome::Accepted);
		assert_eq!(runtime.store().pending_entries().unwrap().len(), 1);
	}

	#[test]
	fn rejects_bad_signature() {
		let (_material, record) = issue_key(KeyId(1), 1_000_000);
		let runtime = build_runtime(vec![record]);

		let result =
			runtime.validate("local-1", b"ticket-1", b"garbage", KeyId(1), TicketKind::Single, 0, 100_000, 500);
		assert!(matches!(result, Err(ValidatorError::BadSignature)));
	}

	#[test]
	fn bloom_hit_rejects_as_duplicate_local() {
		let (material, record) = issue_key(KeyId(1), 1_000_000);
		let runtime = build_runtime(vec![record]);

		let ticket_id = b"ticket-1".to_vec();
		let ticket_hash = TicketHash::of(&ticket_id);
		let (m, k) = ticket_filter::derive_parameters(1, ticket_filter::DEFAULT_TARGET_FPR);
		let mut filter = BloomFilter::new(m, k);
		filter.insert(&ticket_hash);
		runtime
			.apply_bloom_snapshot(BloomSnapshot {
				version: 1,
				built_at: 0,
				coverage_window_secs: 48 * 3600,
				m,
				k,
				expected_n: 1,
				bits: filter.into_bytes(),
			})
			.unwrap();

		let message = canonical_message(&ticket_id, 0, 100_000, TicketKind::Single, KeyId(1));
		let signature = material.sign_raw(&message);

		let result =
			runtime.validate("local-1", &ticket_id, &signature, KeyId(1), TicketKind::Single, 0, 100_000, 500);
		assert!(matches!(result, Err(ValidatorError::DuplicateLocal)));
	}

	#[test]
	fn expired_ticket_is_rejected_past_clock_skew() {
		let (material, record) = issue_key(KeyId(1), 1_000_000);
		let runtime = build_runtime(vec![record]);

		let ticket_id = b"ticket-1".to_vec();
		let message = canonical_message(&ticket_id, 0, 1000, TicketKind::Single, KeyId(1));
		let signature = material.sign_raw(&message);

		// Within skew: still accepted.
		assert!(runtime.validate("l1", &ticket_id, &signature, KeyId(1), TicketKind::Single, 0, 1000, 1100).is_ok());
	}

	#[test]
	fn revoked_key_is_rejected() {
		let (material, mut record) = issue_key(KeyId(1), 1_000_000);
		record.status = KeyStatus::Revoked;
		let runtime = build_runtime(vec![record]);

		let ticket_id = b"ticket-1".to_vec();
		let message = canonical_message(&ticket_id, 0, 100_000, TicketKind::Single, KeyId(1));
		let signature = material.sign_raw(&message);

		let result =
			runtime.validate("local-1", &ticket_id, &signature, KeyId(1), TicketKind::Single, 0, 100_000, 500);
		assert!(matches!(result, Err(ValidatorError::UnknownKey)));
	}
}
