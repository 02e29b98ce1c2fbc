use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for an [`IssuerKey`](crate::IssuerKey). Opaque to clients
/// beyond round-tripping it in requests/responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl fmt::Display for KeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "key-{}", self.0)
	}
}

/// SHA-256 digest of a ticket's identifier. This, never the identifier
/// itself, is what the backend persists and compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketHash(pub [u8; 32]);

impl TicketHash {
	pub fn of(ticket_id: &[u8]) -> Self {
		use sha2::{Digest, Sha256};
		let mut hasher = Sha256::new();
		hasher.update(ticket_id);
		let digest: [u8; 32] = hasher.finalize().into();
		TicketHash(digest)
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl fmt::Display for TicketHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

/// Opaque identifier for a validator device, asserted by the caller on every
/// `redeem`/`sync_offline` request. Not authenticated beyond whatever
/// transport-level auth sits in front of this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatorId(pub String);

impl fmt::Display for ValidatorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ticket_hash_is_deterministic_and_never_stores_the_preimage() {
		let a = TicketHash::of(b"super-secret-ticket-id");
		let b = TicketHash::of(b"super-secret-ticket-id");
		let c = TicketHash::of(b"different-ticket-id");
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(a.to_hex().len(), 64);
	}
}
