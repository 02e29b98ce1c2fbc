//! The online redemption path (§4.4). Budgeted at <=200ms p95 with no
//! external call beyond the Ledger, so the only caching here is the
//! issuer-key-to-`PublicKey` lookup — everything else is a single round
//! trip to [`Ledger`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ticket_crypto::PublicKey;
use ticket_ledger::{Ledger, SpendOutcome};
use ticket_primitives::{
	canonical_message, AuditEvent, AuditSink, KeyId, KeyStatus, TicketHash, TicketKind, UnixTime,
	ValidatorId,
};

use crate::error::RedeemError;

pub struct RedeemerConfig {
	pub day_pass_max_redemptions: u32,
	pub day_pass_window_secs: i64,
	/// `singleTicketClockSkew` (§6, default 120s): tolerance applied to both
	/// ends of a ticket's validity window, matching testable property 7 (a
	/// ticket "never validates after V + clockSkew, and never before its
	/// validFrom - clockSkew").
	pub clock_skew_secs: i64,
}

impl Default for RedeemerConfig {
	fn default() -> Self {
		RedeemerConfig { day_pass_max_redemptions: 20, day_pass_window_secs: 24 * 3600, clock_skew_secs: 120 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemDecision {
	Accepted,
	DoubleSpend,
}

pub struct RedeemRequest {
	pub ticket_id: Vec<u8>,
	pub signature: Vec<u8>,
	pub key_id: KeyId,
	pub validator_id: ValidatorId,
	pub observed_at: UnixTime,
	pub claimed_kind: TicketKind,
	pub claimed_valid_from: UnixTime,
	pub claimed_valid_until: UnixTime,
}

pub struct Redeemer {
	ledger: Arc<Ledger>,
	config: RedeemerConfig,
	key_cache: RwLock<HashMap<KeyId, PublicKey>>,
}

impl Redeemer {
	pub fn new(ledger: Arc<Ledger>, config: RedeemerConfig) -> Self {
		Redeemer { ledger, config, key_cache: RwLock::new(HashMap::new()) }
	}

	fn public_key(&self, key_id: KeyId) -> Result<PublicKey, RedeemError> {
		if let Some(key) = self.key_cache.read().unwrap().get(&key_id) {
			return Ok(key.clone());
		}
		let record = self
			.ledger
			.get_key_record(key_id)
			.map_err(|_| RedeemError::LedgerUnavailable)?
			.ok_or(RedeemError::UnknownKey)?;
		if record.status == KeyStatus::Revoked {
			return Err(RedeemError::UnknownKey);
		}
		let key = PublicKey::from_pem(&record.public_key_pem).map_err(|_| RedeemError::UnknownKey)?;
		self.key_cache.write().unwrap().insert(key_id, key.clone());
		Ok(key)
	}

	/// Implements §4.4 steps 1-6.
	#[tracing::instrument(skip(self, request), fields(validator_id = %request.validator_id))]
	pub fn redeem(&self, request: RedeemRequest) -> Result<RedeemDecision, RedeemError> {
		let ticket_hash = TicketHash::of(&request.ticket_id);

		if self.ledger.is_revoked(ticket_hash).map_err(|_| RedeemError::LedgerUnavailable)? {
			self.audit(&request.validator_id, ticket_hash, "revoked");
			return Err(RedeemError::Revoked);
		}

		let public_key = self.public_key(request.key_id)?;
		let message = canonical_message(
			&request.ticket_id,
			request.claimed_valid_from,
			request.claimed_valid_until,
			request.claimed_kind,
			request.key_id,
		);
		if !ticket_crypto::blind::verify(&message, &request.signature, &public_key) {
			self.audit(&request.validator_id, ticket_hash, "bad_signature");
			return Err(RedeemError::BadSignature);
		}

		if request.observed_at < request.claimed_valid_from - self.config.clock_skew_secs {
			self.audit(&request.validator_id, ticket_hash, "not_yet_valid");
			return Err(RedeemError::NotYetValid);
		}
		if request.observed_at > request.claimed_valid_until + self.config.clock_skew_secs {
			self.audit(&request.validator_id, ticket_hash, "expired");
			return Err(RedeemError::Expired);
		}

		let decision = match request.claimed_kind {
			TicketKind::Single => {
				match self
					.ledger
					.record_single_spend(ticket_hash, &request.validator_id, request.observed_at)
					.map_err(|_| RedeemError::LedgerUnavailable)?
				{
					SpendOutcome::FirstSpend(_) => RedeemDecision::Accepted,
					SpendOutcome::AlreadySpent(existing) => {
						if existing.first_validator_id == request.validator_id
							&& existing.first_seen_at == request.observed_at
						{
							RedeemDecision::Accepted
						} else {
							self.audit(&request.validator_id, ticket_hash, "double_spend");
							return Err(RedeemError::DoubleSpend);
						}
					},
				}
			},
			TicketKind::DayPass => {
				let record = self
					.ledger
					.record_day_pass_spend(
						ticket_hash,
						&request.validator_id,
						request.observed_at,
						self.config.day_pass_window_secs,
					)
					.map_err(|_| RedeemError::LedgerUnavailable)?;
				// Feeds the Reconciler's day-pass recount (§4.6 step 4), which
				// trusts the full observation log over this counter once an
				// offline batch reshuffles the window anchor.
				let local_id = format!("online:{}:{}", request.validator_id, request.observed_at);
				self.ledger
					.record_observation(ticket_hash, &request.validator_id, &local_id, request.observed_at)
					.map_err(|_| RedeemError::LedgerUnavailable)?;
				if record.count > self.config.day_pass_max_redemptions {
					self.audit(&request.validator_id, ticket_hash, "rate_limit_exceeded");
					return Err(RedeemError::RateLimitExceeded);
				}
				RedeemDecision::Accepted
			},
		};

		self.audit(&request.validator_id, ticket_hash, "accepted");
		Ok(decision)
	}

	fn audit(&self, validator_id: &ValidatorId, ticket_hash: TicketHash, outcome: &str) {
		self.ledger.record(
			AuditEvent::new(validator_id.0.clone(), "redeem")
				.with_subject(ticket_hash.to_hex())
				.with_metadata(serde_json::json!({ "outcome": outcome })),
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;
	use ticket_crypto::{KeyMaterial, SoftwareHsm};
	use ticket_primitives::IssuerKeyRecord;

	fn setup() -> (tempfile::TempDir, Arc<Ledger>, KeyMaterial, KeyId) {
		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(Ledger::open(&dir.path().join("db")).unwrap());
		let mut rng = OsRng;
		let material = KeyMaterial::generate(1024, &mut rng).unwrap();
		let key_id = KeyId(1);
		ledger
			.put_key_record(&IssuerKeyRecord {
				key_id,
				public_key_pem: material.public_key().to_pem().unwrap(),
				activates_at: 0,
				expires_at: i64::MAX / 2,
				status: KeyStatus::Active,
			})
			.unwrap();
		(dir, ledger, material, key_id)
	}

	fn sign_ticket(material: &KeyMaterial, ticket_id: &[u8], valid_from: i64, valid_until: i64, key_id: KeyId, kind: TicketKind) -> Vec<u8> {
		let message = canonical_message(ticket_id, valid_from, valid_until, kind, key_id);
		material.sign_raw(&message)
	}

	#[test]
	fn accepts_a_fresh_single_ticket() {
		let (_dir, ledger, material, key_id) = setup();
		let redeemer = Redeemer::new(ledger, RedeemerConfig::default());
		let ticket_id = b"ticket-1".to_vec();
		let signature = sign_ticket(&material, &ticket_id, 0, 1_000_000, key_id, TicketKind::Single);

		let result = redeemer.redeem(RedeemRequest {
			ticket_id,
			signature,
			key_id,
			validator_id: ValidatorId("v1".into()),
			observed_at: 100,
			claimed_kind: TicketKind::Single,
			claimed_valid_from: 0,
			claimed_valid_until: 1_000_000,
		});
		assert_eq!(result.unwrap(), RedeemDecision::Accepted);
	}

	#[test]
	fn second_redemption_of_a_single_ticket_is_a_double_spend() {
		let (_dir, ledger, material, key_id) = setup();
		let redeemer = Redeemer::new(ledger, RedeemerConfig::default());
		let ticket_id = b"ticket-1".to_vec();
		let signature = sign_ticket(&material, &ticket_id, 0, 1_000_000, key_id, TicketKind::Single);

		let request = |observed_at, validator: &str| RedeemRequest {
			ticket_id: ticket_id.clone(),
			signature: signature.clone(),
			key_id,
			validator_id: ValidatorId(validator.into()),
			observed_at,
			claimed_kind: TicketKind::Single,
			claimed_valid_from: 0,
			claimed_valid_until: 1_000_000,
		};

		assert_eq!(redeemer.redeem(request(100, "v1")).unwrap(), RedeemDecision::Accepted);
		let second = redeemer.redeem(request(200, "v2"));
		assert_eq!(second, Err(RedeemError::DoubleSpend));
	}

	#[test]
	fn day_pass_enforces_redemption_limit() {
		let (_dir, ledger, material, key_id) = setup();
		let mut config = RedeemerConfig::default();
		config.day_pass_max_redemptions = 2;
		let redeemer = Redeemer::new(ledger, config);
		let ticket_id = b"day-pass-1".to_vec();
		let signature = sign_ticket(&material, &ticket_id, 0, 1_000_000, key_id, TicketKind::DayPass);

		let request = |observed_at| RedeemRequest {
			ticket_id: ticket_id.clone(),
			signature: signature.clone(),
			key_id,
			validator_id: ValidatorId("v1".into()),
			observed_at,
			claimed_kind: TicketKind::DayPass,
			claimed_valid_from: 0,
			claimed_valid_until: 1_000_000,
		};

		assert_eq!(redeemer.redeem(request(100)).unwrap(), RedeemDecision::Accepted);
		assert_eq!(redeemer.redeem(request(200)).unwrap(), RedeemDecision::Accepted);
		assert_eq!(redeemer.redeem(request(300)), Err(RedeemError::RateLimitExceeded));
	}

	#[test]
	fn rejects_expired_ticket() {
		let (_dir, ledger, material, key_id) = setup();
		let redeemer = Redeemer::new(ledger, RedeemerConfig::default());
		let ticket_id = b"ticket-1".to_vec();
		let signature = sign_ticket(&material, &ticket_id, 0, 1000, key_id, TicketKind::Single);

		let result = redeemer.redeem(RedeemRequest {
			ticket_id,
			signature,
			key_id,
			validator_id: ValidatorId("v1".into()),
			observed_at: 2000,
			claimed_kind: TicketKind::Single,
			claimed_valid_from: 0,
			claimed_valid_until: 1000,
		});
		assert_eq!(result, Err(RedeemError::Expired));
	}
}
