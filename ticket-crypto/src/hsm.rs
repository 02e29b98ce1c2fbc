//! Abstraction over the signing hardware the spec places out of scope
//! (§1 Non-goals, §9 Design Notes: "assume an HSM-backed signer exists").
//! [`SigningCapability`] is the seam; [`SoftwareHsm`] is a software-only
//! stand-in used in tests and local development, never in production.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::rngs::OsRng;
use thiserror::Error;
use ticket_primitives::KeyId;

use crate::key::{KeyMaterial, PublicKey};

#[derive(Debug, Error)]
pub enum HsmError {
	#[error("key {0} is not known to this signer")]
	UnknownKey(KeyId),
	#[error("signer temporarily unavailable")]
	Unavailable,
}

/// What the Blind Signer (§4.2) needs from its signing backend: produce a
/// raw RSA signature over an already-blinded value for a specific key.
/// Implementations must never log or persist the blinded input or the
/// resulting signature — doing so would let the implementation correlate
/// issuance with redemption, defeating the protocol's unlinkability goal.
#[async_trait::async_trait]
pub trait SigningCapability: Send + Sync {
	async fn sign_blinded(&self, key_id: KeyId, blinded: &[u8]) -> Result<Vec<u8>, HsmError>;

	/// The public half of `key_id`, for publishing via `GET /keys/public`.
	fn public_key(&self, key_id: KeyId) -> Result<PublicKey, HsmError>;
}

/// An in-process, software-only [`SigningCapability`]. Adequate for tests
/// and local development; a production deployment must swap this for a
/// capability backed by real signing hardware (PKCS#11, cloud KMS, etc) —
/// this type is not hardened against key extraction from process memory.
#[derive(Default)]
pub struct SoftwareHsm {
	keys: RwLock<HashMap<KeyId, KeyMaterial>>,
}

impl SoftwareHsm {
	pub fn new() -> Self {
		SoftwareHsm { keys: RwLock::new(HashMap::new()) }
	}

	/// Generates a new RSA key pair and registers it under `key_id`,
	/// returning the public half for the caller to persist as an
	/// [`ticket_primitives::IssuerKeyRecord`].
	pub fn generate_key(&self, key_id: KeyId, bits: usize) -> Result<PublicKey, HsmError> {
		let mut rng = OsRng;
		let material = KeyMaterial::generate(bits, &mut rng).map_err(|_| HsmError::Unavailable)?;
		let public = material.public_key();
		self.keys.write().unwrap().insert(key_id, material);
		Ok(public)
	}
}

#[async_trait::async_trait]
impl SigningCapability for SoftwareHsm {
	async fn sign_blinded(&self, key_id: KeyId, blinded: &[u8]) -> Result<Vec<u8>, HsmError> {
		let keys = self.keys.read().unwrap();
		let material = keys.get(&key_id).ok_or(HsmError::UnknownKey(key_id))?;
		Ok(material.sign_raw(blinded))
	}

	fn public_key(&self, key_id: KeyId) -> Result<PublicKey, HsmError> {
		let keys = self.keys.read().unwrap();
		keys.get(&key_id).map(KeyMaterial::public_key).ok_or(HsmError::UnknownKey(key_id))
	}
}
