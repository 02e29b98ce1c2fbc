//! RSA blind signatures (Chaum), as described in the spec's Design Notes
//! (§9): the client blinds `H(ticketId || metadata)` with a random factor
//! coprime to the modulus, the signer exponentiates the blinded value with
//! its private key, and the client unblinds the result into a signature
//! that verifies directly against the signer's public key.
//!
//! No padding scheme is mandated by the spec; this implementation hashes
//! the canonical message to a 256-bit integer and treats that as the RSA
//! message representative directly (textbook RSA over the digest). This is
//! adequate for this exercise's threat model (the metadata-binding in the
//! canonical message, not padding, is what stops ticket forgery) but is not
//! a general-purpose blind-signature padding scheme.

use num_bigint_dig::{BigInt, BigUint, ModInverse, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::key::PublicKey;

/// What the client retains between blinding a message and unblinding the
/// signer's response. Never transmitted to the backend.
#[derive(Clone)]
pub struct BlindingFactor(BigUint);

/// Hashes `message` to an RSA message representative in `[0, n)`.
fn hash_to_representative(message: &[u8], n: &BigUint) -> BigUint {
	let digest = Sha256::digest(message);
	BigUint::from_bytes_be(&digest) % n
}

/// Picks a blinding factor `r` coprime to `n` and returns
/// `(blinded, factor)` where `blinded = H(message) * r^e mod n`.
pub fn blind(message: &[u8], public_key: &PublicKey, rng: &mut impl RngCore) -> (Vec<u8>, BlindingFactor) {
	let n = &public_key.n;
	let e = &public_key.e;
	let h = hash_to_representative(message, n);

	let r = loop {
		let candidate = rng.gen_biguint_below(n);
		if candidate > BigUint::zero() && candidate.gcd(n) == BigUint::one() {
			break candidate;
		}
	};

	let blinded = (h * r.modpow(e, n)) % n;
	(blinded.to_bytes_be(), BlindingFactor(r))
}

/// Removes the blinding factor from the signer's response:
/// `signature = blinded_signature * r^-1 mod n`.
pub fn unblind(blinded_signature: &[u8], factor: &BlindingFactor, public_key: &PublicKey) -> Vec<u8> {
	let n = &public_key.n;
	let s = BigUint::from_bytes_be(blinded_signature);
	let r_inv = mod_inverse(&factor.0, n).expect("blinding factor was chosen coprime to n");
	((s * r_inv) % n).to_bytes_be()
}

/// Verifies `signature` against `message` under `public_key`:
/// `signature^e mod n == H(message)`.
pub fn verify(message: &[u8], signature: &[u8], public_key: &PublicKey) -> bool {
	let n = &public_key.n;
	let e = &public_key.e;
	let h = hash_to_representative(message, n);
	let s = BigUint::from_bytes_be(signature);
	if s >= *n {
		return false;
	}
	s.modpow(e, n) == h
}

fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Option<BigUint> {
	let value = BigInt::from_biguint(Sign::Plus, value.clone());
	let modulus = BigInt::from_biguint(Sign::Plus, modulus.clone());
	value.mod_inverse(modulus).and_then(|inv| inv.to_biguint())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::KeyMaterial;
	use proptest::prelude::*;
	use rand::SeedableRng;
	use std::sync::OnceLock;

	#[test]
	fn blind_sign_unblind_round_trips() {
		let mut rng = rand_chacha_test_rng();
		let key = KeyMaterial::generate(1024, &mut rng).expect("keygen");
		let public = key.public_key();

		let message = b"ticket-id || metadata";
		let (blinded, factor) = blind(message, &public, &mut rng);

		let blind_sig = key.sign_raw(&blinded);

		let signature = unblind(&blind_sig, &factor, &public);

		assert!(verify(message, &signature, &public));
	}

	#[test]
	fn tampered_message_fails_verification() {
		let mut rng = rand_chacha_test_rng();
		let key = KeyMaterial::generate(1024, &mut rng).expect("keygen");
		let public = key.public_key();

		let (blinded, factor) = blind(b"original-message", &public, &mut rng);
		let blind_sig = key.sign_raw(&blinded);
		let signature = unblind(&blind_sig, &factor, &public);

		assert!(!verify(b"different-message", &signature, &public));
	}

	fn rand_chacha_test_rng() -> rand::rngs::StdRng {
		rand::rngs::StdRng::seed_from_u64(42)
	}

	/// Generating a fresh RSA key per proptest case would dominate runtime,
	/// so the key is fixed once and the message itself is the property under
	/// test (property 6 in §8: sign(blind(h)) then unblind always verifies).
	fn shared_test_key() -> &'static KeyMaterial {
		static KEY: OnceLock<KeyMaterial> = OnceLock::new();
		KEY.get_or_init(|| KeyMaterial::generate(1024, &mut rand_chacha_test_rng()).expect("keygen"))
	}

	proptest! {
		#![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

		#[test]
		fn round_trips_for_arbitrary_messages(message in proptest::collection::vec(any::<u8>(), 0..256)) {
			let key = shared_test_key();
			let public = key.public_key();
			let mut rng = rand::rngs::StdRng::seed_from_u64(message.iter().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u64)));
			let (blinded, factor) = blind(&message, &public, &mut rng);
			let blind_sig = key.sign_raw(&blinded);
			let signature = unblind(&blind_sig, &factor, &public);
			prop_assert!(verify(&message, &signature, &public));
		}
	}
}
