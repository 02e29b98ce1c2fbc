//! The Bloom filter itself (§4.5): parameter derivation and the
//! insert/contains operations the Validator Runtime and the Filter
//! Publisher both need. Membership hashing uses the Kirsch-Mitzenmacher
//! double-hashing trick — two independent hashes derived from one SHA-256
//! digest stand in for `k` independent hash functions.

use bitvec::prelude::*;
use sha2::{Digest, Sha256};
use ticket_primitives::TicketHash;

/// Target false-positive rate this deployment builds filters for (§6
/// `bloomTargetFpr`).
pub const DEFAULT_TARGET_FPR: f64 = 0.001;

/// Derives `(m, k)` from the target false-positive rate `p` and the
/// expected number of elements `n`, following the standard Bloom filter
/// sizing formulas in §4.5. `n` is floored at 1 so an empty coverage
/// window still yields a usable (if minimal) filter rather than a
/// division by zero.
pub fn derive_parameters(expected_n: u64, target_fpr: f64) -> (u64, u32) {
	let n = (expected_n.max(1)) as f64;
	let m = (-n * target_fpr.ln() / (std::f64::consts::LN_2.powi(2))).ceil().max(8.0) as u64;
	let k = ((m as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32;
	(m, k)
}

pub struct BloomFilter {
	m: u64,
	k: u32,
	bits: BitVec<u8, Lsb0>,
}

impl BloomFilter {
	pub fn new(m: u64, k: u32) -> Self {
		BloomFilter { m, k, bits: bitvec![u8, Lsb0; 0; m as usize] }
	}

	pub fn m(&self) -> u64 {
		self.m
	}

	pub fn k(&self) -> u32 {
		self.k
	}

	fn indices(&self, ticket_hash: &TicketHash) -> impl Iterator<Item = usize> + '_ {
		let digest = Sha256::digest(ticket_hash.0);
		let h1 = u64::from_be_bytes(digest[0..8].try_into().unwrap());
		let h2 = u64::from_be_bytes(digest[8..16].try_into().unwrap());
		let m = self.m;
		(0..self.k).map(move |i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % m) as usize)
	}

	pub fn insert(&mut self, ticket_hash: &TicketHash) {
		for index in self.indices(ticket_hash) {
			self.bits.set(index, true);
		}
	}

	pub fn contains(&self, ticket_hash: &TicketHash) -> bool {
		self.indices(ticket_hash).all(|index| self.bits[index])
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.bits.into_vec()
	}

	pub fn from_bytes(bytes: Vec<u8>, m: u64, k: u32) -> Self {
		let mut bits: BitVec<u8, Lsb0> = BitVec::from_vec(bytes);
		bits.truncate(m as usize);
		BloomFilter { m, k, bits }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#![proptest_config(ProptestConfig { cases: 20, ..ProptestConfig::default() })]

		/// Property 3 (§8): every hash inserted before a lookup is always
		/// found, regardless of how many other hashes share the filter.
		#[test]
		fn every_inserted_hash_is_found(
			inserted in proptest::collection::vec(any::<u32>(), 1..500),
		) {
			let n = inserted.len() as u64;
			let (m, k) = derive_parameters(n, DEFAULT_TARGET_FPR);
			let mut filter = BloomFilter::new(m, k);
			let hashes: Vec<TicketHash> = inserted.iter().map(|i| TicketHash::of(&i.to_be_bytes())).collect();
			for h in &hashes {
				filter.insert(h);
			}
			prop_assert!(hashes.iter().all(|h| filter.contains(h)));
		}
	}

	#[test]
	fn parameters_grow_with_expected_count() {
		let (m_small, _) = derive_parameters(100, DEFAULT_TARGET_FPR);
		let (m_large, _) = derive_parameters(100_000, DEFAULT_TARGET_FPR);
		assert!(m_large > m_small);
	}

	#[test]
	fn inserted_elements_are_always_found() {
		let (m, k) = derive_parameters(1000, DEFAULT_TARGET_FPR);
		let mut filter = BloomFilter::new(m, k);
		let hashes: Vec<TicketHash> = (0..1000u32).map(|i| TicketHash::of(&i.to_be_bytes())).collect();
		for h in &hashes {
			filter.insert(h);
		}
		assert!(hashes.iter().all(|h| filter.contains(h)));
	}

	#[test]
	fn false_positive_rate_is_roughly_bounded() {
		let n = 2000u64;
		let (m, k) = derive_parameters(n, DEFAULT_TARGET_FPR);
		let mut filter = BloomFilter::new(m, k);
		for i in 0..n as u32 {
			filter.insert(&TicketHash::of(&i.to_be_bytes()));
		}

		let false_positives = (n as u32..n as u32 * 3)
			.filter(|i| filter.contains(&TicketHash::of(&i.to_be_bytes())))
			.count();
		let observed_rate = false_positives as f64 / (n as f64 * 2.0);
		assert!(observed_rate < DEFAULT_TARGET_FPR * 10.0, "observed_rate={observed_rate}");
	}

	#[test]
	fn round_trips_through_bytes() {
		let (m, k) = derive_parameters(10, DEFAULT_TARGET_FPR);
		let mut filter = BloomFilter::new(m, k);
		let hash = TicketHash::of(b"ticket");
		filter.insert(&hash);

		let bytes = filter.into_bytes();
		let restored = BloomFilter::from_bytes(bytes, m, k);
		assert!(restored.contains(&hash));
	}
}
