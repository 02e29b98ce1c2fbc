//! The Blind Signer component (§4.2): a thin, rate-limited, audited wrapper
//! around a [`SigningCapability`]. This is the only thing in the workspace
//! that is allowed to touch a blinded digest, and it is deliberately kept
//! free of any knowledge of tickets, receipts, or redemption — it knows
//! only "sign this opaque blob under this key, for this caller".

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use sha2::{Digest, Sha256};
use thiserror::Error;
use ticket_primitives::{AuditEvent, AuditSink, KeyId};

use crate::hsm::{HsmError, SigningCapability};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SignerError {
	#[error("unknown key")]
	UnknownKey,
	#[error("key revoked")]
	KeyRevoked,
	#[error("signer temporarily unavailable")]
	HsmUnavailable,
	#[error("rate limit exceeded")]
	RateLimited,
	#[error("malformed input")]
	MalformedInput,
}

impl From<HsmError> for SignerError {
	fn from(e: HsmError) -> Self {
		match e {
			HsmError::UnknownKey(_) => SignerError::UnknownKey,
			HsmError::Unavailable => SignerError::HsmUnavailable,
		}
	}
}

/// Per-caller token bucket. `capacity` is the burst allowance; `rate` is
/// the sustained refill rate in tokens/sec.
struct TokenBucket {
	tokens: f64,
	capacity: f64,
	rate: f64,
	last_refill: Instant,
}

impl TokenBucket {
	fn new(capacity: f64, rate: f64) -> Self {
		TokenBucket { tokens: capacity, capacity, rate, last_refill: Instant::now() }
	}

	fn try_take(&mut self) -> bool {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
		self.last_refill = now;

		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

pub struct RateLimitConfig {
	pub sustained_per_sec: f64,
	pub burst: f64,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		RateLimitConfig { sustained_per_sec: 50.0, burst: 200.0 }
	}
}

pub struct BlindSigner<H, A> {
	hsm: H,
	audit: A,
	config: RateLimitConfig,
	buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl<H: SigningCapability, A: AuditSink> BlindSigner<H, A> {
	pub fn new(hsm: H, audit: A, config: RateLimitConfig) -> Self {
		BlindSigner { hsm, audit, config, buckets: Mutex::new(HashMap::new()) }
	}

	#[tracing::instrument(skip(self, blinded_digest), fields(caller = %caller, key_id = %key_id))]
	pub async fn sign_blinded(
		&self,
		caller: &str,
		key_id: KeyId,
		blinded_digest: &[u8],
	) -> Result<Vec<u8>, SignerError> {
		if blinded_digest.is_empty() {
			self.emit(caller, key_id, blinded_digest, "malformed_input");
			return Err(SignerError::MalformedInput);
		}

		if !self.take_token(caller) {
			self.emit(caller, key_id, blinded_digest, "rate_limited");
			return Err(SignerError::RateLimited);
		}

		match self.hsm.sign_blinded(key_id, blinded_digest).await {
			Ok(signature) => {
				self.emit(caller, key_id, blinded_digest, "ok");
				Ok(signature)
			},
			Err(e) => {
				let outcome = match SignerError::from(e) {
					SignerError::UnknownKey => "unknown_key",
					SignerError::HsmUnavailable => "hsm_unavailable",
					other => {
						tracing::warn!(?other, "unexpected hsm error classification");
						"hsm_unavailable"
					},
				};
				self.emit(caller, key_id, blinded_digest, outcome);
				Err(outcome_to_error(outcome))
			},
		}
	}

	fn take_token(&self, caller: &str) -> bool {
		let mut buckets = self.buckets.lock().unwrap();
		let bucket = buckets
			.entry(caller.to_string())
			.or_insert_with(|| TokenBucket::new(self.config.burst, self.config.sustained_per_sec));
		bucket.try_take()
	}

	fn emit(&self, caller: &str, key_id: KeyId, blinded_digest: &[u8], outcome: &str) {
		let digest_hash = hex::encode(Sha256::digest(blinded_digest));
		self.audit.record(
			AuditEvent::new(caller, "sign_blinded")
				.with_subject(digest_hash)
				.with_metadata(serde_json::json!({ "key_id": key_id.0, "outcome": outcome })),
		);
	}
}

fn outcome_to_error(outcome: &str) -> SignerError {
	match outcome {
		"unknown_key" => SignerError::UnknownKey,
		"hsm_unavailable" => SignerError::HsmUnavailable,
		_ => SignerError::HsmUnavailable,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hsm::SoftwareHsm;
	use std::sync::Mutex as StdMutex;

	struct RecordingAudit {
		events: StdMutex<Vec<AuditEvent>>,
	}

	impl AuditSink for RecordingAudit {
		fn record(&self, event: AuditEvent) {
			self.events.lock().unwrap().push(event);
		}
	}

	#[tokio::test]
	async fn signs_and_records_audit_event() {
		let hsm = SoftwareHsm::new();
		let key_id = KeyId(1);
		hsm.generate_key(key_id, 1024).expect("generate");
		let audit = RecordingAudit { events: StdMutex::new(Vec::new()) };
		let signer = BlindSigner::new(hsm, audit, RateLimitConfig::default());

		let result = signer.sign_blinded("validator-1", key_id, b"blinded-bytes").await;
		assert!(result.is_ok());
		assert_eq!(signer.audit.events.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn empty_input_is_rejected_without_consuming_a_token() {
		let hsm = SoftwareHsm::new();
		let audit = RecordingAudit { events: StdMutex::new(Vec::new()) };
		let signer = BlindSigner::new(hsm, audit, RateLimitConfig::default());

		let result = signer.sign_blinded("validator-1", KeyId(1), b"").await;
		assert!(matches!(result, Err(SignerError::MalformedInput)));
	}

	#[tokio::test]
	async fn exhausting_burst_allowance_rate_limits_caller() {
		let hsm = SoftwareHsm::new();
		let key_id = KeyId(1);
		hsm.generate_key(key_id, 1024).expect("generate");
		let audit = RecordingAudit { events: StdMutex::new(Vec::new()) };
		let signer =
			BlindSigner::new(hsm, audit, RateLimitConfig { sustained_per_sec: 1.0, burst: 2.0 });

		assert!(signer.sign_blinded("validator-1", key_id, b"a").await.is_ok());
		assert!(signer.sign_blinded("validator-1", key_id, b"b").await.is_ok());
		let result = signer.sign_blinded("validator-1", key_id, b"c").await;
		assert!(matches!(result, Err(SignerError::RateLimited)));
	}
}
