//! RSA key material for the Issuer's signing keys (§3 `IssuerKeyRecord`,
//! §4.2 Blind Signer). Keys are generated and held as `rsa` crate types so
//! PEM encoding follows the same path production RSA tooling uses, but the
//! actual blind-signature math in [`crate::blind`] operates on the raw
//! `BigUint` modulus/exponents, since the `rsa` crate's own signing API
//! assumes a padding scheme this protocol does not use.

use num_bigint_dig::BigUint;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum KeyError {
	#[error("failed to generate RSA key pair: {0}")]
	Generation(String),
	#[error("invalid PEM-encoded public key: {0}")]
	InvalidPem(String),
}

/// The public half of an issuer signing key: just what a Validator Runtime
/// needs to verify a signature (§4.2, §6 `GET /keys/public`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
	pub n: BigUint,
	pub e: BigUint,
}

impl PublicKey {
	pub fn to_pem(&self) -> Result<String, KeyError> {
		let public = RsaPublicKey::new(self.n.clone(), self.e.clone())
			.map_err(|e| KeyError::InvalidPem(e.to_string()))?;
		public
			.to_public_key_pem(LineEnding::LF)
			.map_err(|e| KeyError::InvalidPem(e.to_string()))
	}

	pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
		let public = RsaPublicKey::from_public_key_pem(pem).map_err(|e| KeyError::InvalidPem(e.to_string()))?;
		Ok(PublicKey { n: public.n().clone(), e: public.e().clone() })
	}
}

/// A full RSA key pair. `n`/`e`/`d` are cached alongside the `rsa` crate's
/// own representation so [`crate::blind`] can do raw modular exponentiation
/// without re-deriving them on every call.
pub struct KeyMaterial {
	private: RsaPrivateKey,
	n: BigUint,
	e: BigUint,
	d: BigUint,
}

impl KeyMaterial {
	pub fn generate(bits: usize, rng: &mut impl RngCore) -> Result<Self, KeyError> {
		let private = RsaPrivateKey::new(rng, bits).map_err(|e| KeyError::Generation(e.to_string()))?;
		Ok(KeyMaterial::from_private(private))
	}

	fn from_private(private: RsaPrivateKey) -> Self {
		let n = private.n().clone();
		let e = private.e().clone();
		let d = private.d().clone();
		KeyMaterial { private, n, e, d }
	}

	pub fn public_key(&self) -> PublicKey {
		PublicKey { n: self.n.clone(), e: self.e.clone() }
	}

	/// Raw RSA exponentiation with the private exponent: `m^d mod n`. Used
	/// by the Blind Signer to answer `sign_blinded` requests — the blinded
	/// value passed in has already had any message structure stripped away
	/// by the client, so there is no padding to unwrap here.
	pub fn sign_raw(&self, blinded: &[u8]) -> Vec<u8> {
		let m = BigUint::from_bytes_be(blinded) % &self.n;
		m.modpow(&self.d, &self.n).to_bytes_be()
	}
}

impl std::fmt::Debug for KeyMaterial {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyMaterial").field("n_bits", &self.n.bits()).finish_non_exhaustive()
	}
}

/// `private` already zeroizes its own copy of the private exponent on drop
/// (the `rsa` crate wires that up internally); the cached raw `d` kept
/// alongside it for [`KeyMaterial::sign_raw`] is a second copy that `rsa`
/// never sees, so it needs its own zeroize-on-drop the same way
/// `engine/multisig` zeroizes its own cached key-share material.
impl Drop for KeyMaterial {
	fn drop(&mut self) {
		self.d.zeroize();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	#[test]
	fn public_key_pem_round_trips() {
		let mut rng = rand::rngs::StdRng::seed_from_u64(7);
		let key = KeyMaterial::generate(1024, &mut rng).expect("keygen");
		let public = key.public_key();

		let pem = public.to_pem().expect("encode");
		let decoded = PublicKey::from_pem(&pem).expect("decode");

		assert_eq!(public, decoded);
	}

	#[test]
	fn rejects_garbage_pem() {
		assert!(PublicKey::from_pem("not a pem").is_err());
	}
}
