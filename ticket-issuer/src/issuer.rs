//! Orchestrates the ticket-purchase flow in §4.3: verifies payment, resolves
//! the signing key, clamps the requested validity window, and calls the
//! Blind Signer. The Issuer never sees a ticketId — only the caller's
//! opaque `blindedDigest` — so it has no way to confirm the digest actually
//! encodes the `(keyId, validFrom, validUntil, ticketKind)` it announces in
//! its response; that binding is the client's responsibility, and a client
//! that gets it wrong will simply fail verification at redeem time.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use ticket_crypto::{BlindSigner, RateLimitConfig, SignerError, SigningCapability};
use ticket_ledger::{Ledger, LedgerError};
use ticket_primitives::{
	now_unix, AuditEvent, AuditSink, IssuedTicketSlot, KeyId, Receipt, ReceiptStatus, TicketKind,
	UnixTime,
};

use crate::error::IssuerError;
use crate::payment::{PaymentAdapter, PaymentAdapterError, PaymentStatus, PaymentVerification};

pub struct IssuerConfig {
	/// Default: the maximum validity of any ticket kind this deployment
	/// issues (§6 `keyMinLeadTime`).
	pub key_min_lead_time: i64,
}

pub struct Issuer<H, A> {
	ledger: Arc<Ledger>,
	signer: Arc<BlindSigner<H, A>>,
	payment: Arc<dyn PaymentAdapter>,
	config: IssuerConfig,
}

pub struct SignedTicket {
	pub signature: Vec<u8>,
	pub key_id: KeyId,
	pub valid_from: UnixTime,
	pub valid_until: UnixTime,
}

impl<H: SigningCapability, A: AuditSink> Issuer<H, A> {
	pub fn new(
		ledger: Arc<Ledger>,
		signer: Arc<BlindSigner<H, A>>,
		payment: Arc<dyn PaymentAdapter>,
		config: IssuerConfig,
	) -> Self {
		Issuer { ledger, signer, payment, config }
	}

	/// `POST /verify_receipt` (§6): checks the Payment Adapter and, on a
	/// verified result, persists a new `pending` [`Receipt`] so a later
	/// `sign_blinded` call can consume it exactly once.
	#[tracing::instrument(skip(self))]
	pub async fn verify_receipt(
		&self,
		payment_provider: &str,
		provider_receipt_id: &str,
	) -> Result<PaymentVerification, IssuerError> {
		if let Some(existing) = self
			.ledger
			.get_receipt_by_provider(payment_provider, provider_receipt_id)
			.map_err(|_| IssuerError::LedgerUnavailable)?
		{
			return Ok(PaymentVerification {
				receipt_id: existing.receipt_id,
				status: match existing.status {
					ReceiptStatus::Pending => PaymentStatus::Verified,
					ReceiptStatus::Consumed => PaymentStatus::Verified,
					ReceiptStatus::Rejected => PaymentStatus::Rejected,
				},
				amount: existing.amount,
				currency: existing.currency,
			});
		}

		let verification = self.payment.verify(payment_provider, provider_receipt_id).await.map_err(|e| {
			match e {
				PaymentAdapterError::NotFound => IssuerError::ReceiptUnverified,
				PaymentAdapterError::Unavailable(_) => IssuerError::LedgerUnavailable,
			}
		})?;

		if verification.status == PaymentStatus::Verified {
			let receipt = Receipt {
				receipt_id: verification.receipt_id.clone(),
				payment_provider: payment_provider.to_string(),
				provider_receipt_id: provider_receipt_id.to_string(),
				amount: verification.amount,
				currency: verification.currency.clone(),
				status: ReceiptStatus::Pending,
				created_at: now_unix(),
			};
			// A concurrent caller may have just won this race; either way a
			// `pending` Receipt now exists for this provider reference, so a
			// `DuplicateReceipt` here is not an error from the caller's point
			// of view.
			match self.ledger.create_receipt(&receipt) {
				Ok(()) | Err(LedgerError::DuplicateReceipt) => {},
				Err(_) => return Err(IssuerError::LedgerUnavailable),
			}
		}

		Ok(verification)
	}

	/// `POST /sign_blinded` (§4.3, §6).
	#[allow(clippy::too_many_arguments)]
	#[tracing::instrument(skip(self, blinded_digest))]
	pub async fn sign_blinded(
		&self,
		caller: &str,
		receipt_ref: &str,
		blinded_digest: &[u8],
		requested_key_id: Option<KeyId>,
		ticket_kind: TicketKind,
		requested_valid_from: UnixTime,
		requested_valid_until: UnixTime,
	) -> Result<SignedTicket, IssuerError> {
		let receipt = self
			.ledger
			.get_receipt(receipt_ref)
			.map_err(|_| IssuerError::LedgerUnavailable)?
			.ok_or(IssuerError::ReceiptUnverified)?;
		if receipt.status != ReceiptStatus::Pending {
			return Err(IssuerError::ReceiptAlreadyConsumed);
		}

		let now = now_unix();
		let (key, lead_time_ok) = self
			.ledger
			.current_signing_key(now, self.config.key_min_lead_time)
			.map_err(|_| IssuerError::LedgerUnavailable)?
			.ok_or(IssuerError::NoActiveSigningKey)?;

		if !lead_time_ok {
			self.signer_audit(caller, "key_lead_time_short", key.key_id);
		}
		if requested_key_id.is_some_and(|requested| requested != key.key_id) {
			tracing::debug!(requested = ?requested_key_id, actual = ?key.key_id, "substituting current signing key");
		}

		let valid_until = requested_valid_until.min(key.expires_at);
		let valid_from = requested_valid_from.max(now);
		if valid_from >= valid_until {
			return Err(IssuerError::ValidityOutOfRange);
		}

		let signature = self
			.signer
			.sign_blinded(caller, key.key_id, blinded_digest)
			.await
			.map_err(|e| match e {
				SignerError::UnknownKey | SignerError::KeyRevoked => IssuerError::NoActiveSigningKey,
				SignerError::HsmUnavailable => IssuerError::HsmUnavailable,
				SignerError::RateLimited => IssuerError::HsmUnavailable,
				SignerError::MalformedInput => IssuerError::ValidityOutOfRange,
			})?;

		let blinded_request_hash: [u8; 32] = Sha256::digest(blinded_digest).into();
		let slot = IssuedTicketSlot {
			receipt_id: receipt_ref.to_string(),
			key_id: key.key_id,
			ticket_kind,
			valid_from,
			valid_until,
			issued_at: now,
			blinded_request_hash,
		};

		// Not atomic with the sign call above (the Blind Signer lives
		// outside the Ledger's write path); a crash between the two leaves
		// a signed-but-unconsumed receipt, which only lets the same client
		// retry the exact same purchase, never a free extra ticket.
		self.ledger
			.consume_receipt_and_issue_slot(receipt_ref, slot)
			.map_err(|e| match e {
				LedgerError::ReceiptAlreadyConsumed => IssuerError::ReceiptAlreadyConsumed,
				LedgerError::ReceiptNotFound => IssuerError::ReceiptUnverified,
				_ => IssuerError::LedgerUnavailable,
			})?;

		Ok(SignedTicket { signature, key_id: key.key_id, valid_from, valid_until })
	}

	fn signer_audit(&self, caller: &str, kind: &str, key_id: KeyId) {
		self.ledger.record(
			AuditEvent::new(caller, kind).with_metadata(serde_json::json!({ "key_id": key_id.0 })),
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;
	use ticket_crypto::SoftwareHsm;
	use ticket_primitives::{IssuerKeyRecord, KeyStatus};

	fn build_issuer() -> (tempfile::TempDir, Issuer<SoftwareHsm, Arc<Ledger>>, Arc<InMemoryPaymentAdapter>) {
		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(Ledger::open(&dir.path().join("db")).unwrap());

		let hsm = SoftwareHsm::new();
		let public = hsm.generate_key(KeyId(1), 1024).unwrap();
		ledger
			.put_key_record(&IssuerKeyRecord {
				key_id: KeyId(1),
				public_key_pem: public.to_pem().unwrap(),
				activates_at: 0,
				expires_at: now_unix() + 86_400,
				status: KeyStatus::Active,
			})
			.unwrap();

		let signer = Arc::new(BlindSigner::new(hsm, ledger.clone(), RateLimitConfig::default()));
		let payment = Arc::new(InMemoryPaymentAdapter::new());
		let issuer = Issuer::new(ledger.clone(), signer, payment.clone(), IssuerConfig { key_min_lead_time: 60 });
		(dir, issuer, payment)
	}

	#[tokio::test]
	async fn verify_receipt_persists_a_pending_receipt_on_success() {
		let (_dir, issuer, payment) = build_issuer();
		payment.seed(
			"stripe",
			"pi_1",
			PaymentVerification {
				receipt_id: "r1".into(),
				status: PaymentStatus::Verified,
				amount: 500,
				currency: "USD".into(),
			},
		);

		let result = issuer.verify_receipt("stripe", "pi_1").await.unwrap();
		assert_eq!(result.status, PaymentStatus::Verified);

		let receipt = issuer.ledger.get_receipt("r1").unwrap().unwrap();
		assert_eq!(receipt.status, ReceiptStatus::Pending);
	}

	#[tokio::test]
	async fn sign_blinded_consumes_the_receipt_exactly_once() {
		let (_dir, issuer, payment) = build_issuer();
		payment.seed(
			"stripe",
			"pi_1",
			PaymentVerification {
				receipt_id: "r1".into(),
				status: PaymentStatus::Verified,
				amount: 500,
				currency: "USD".into(),
			},
		);
		issuer.verify_receipt("stripe", "pi_1").await.unwrap();

		let mut rng = OsRng;
		let public = issuer.ledger.get_key_record(KeyId(1)).unwrap().unwrap();
		let public_key = ticket_crypto::PublicKey::from_pem(&public.public_key_pem).unwrap();
		let now = now_unix();
		let (blinded, _factor) =
			ticket_crypto::blind::blind(b"canonical-message", &public_key, &mut rng);

		let result = issuer
			.sign_blinded("validator-1", "r1", &blinded, None, TicketKind::Single, now, now + 3600)
			.await
			.unwrap();
		assert_eq!(result.key_id, KeyId(1));

		let second = issuer
			.sign_blinded("validator-1", "r1", &blinded, None, TicketKind::Single, now, now + 3600)
			.await;
		assert!(matches!(second, Err(IssuerError::ReceiptAlreadyConsumed)));
	}
}
