use serde::{Deserialize, Serialize};

use crate::ids::KeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketKind {
	Single,
	DayPass,
}

impl TicketKind {
	fn tag(self) -> u8 {
		match self {
			TicketKind::Single => 0,
			TicketKind::DayPass => 1,
		}
	}
}

/// The canonical message a ticket's signature covers:
/// `ticketId || validFrom || validUntil || ticketKind || keyId`, all
/// fixed-width big-endian, so that an adversary cannot replay a signature
/// with forged metadata (§9 Design Notes).
///
/// `validFrom`/`validUntil` are Unix timestamps (seconds).
pub fn canonical_message(
	ticket_id: &[u8],
	valid_from: i64,
	valid_until: i64,
	kind: TicketKind,
	key_id: KeyId,
) -> Vec<u8> {
	let mut buf = Vec::with_capacity(ticket_id.len() + 8 + 8 + 1 + 4);
	buf.extend_from_slice(ticket_id);
	buf.extend_from_slice(&valid_from.to_be_bytes());
	buf.extend_from_slice(&valid_until.to_be_bytes());
	buf.push(kind.tag());
	buf.extend_from_slice(&key_id.0.to_be_bytes());
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn differing_metadata_produces_differing_messages() {
		let base = canonical_message(b"abc", 100, 200, TicketKind::Single, KeyId(1));
		let diff_validity = canonical_message(b"abc", 100, 999, TicketKind::Single, KeyId(1));
		let diff_kind = canonical_message(b"abc", 100, 200, TicketKind::DayPass, KeyId(1));
		let diff_key = canonical_message(b"abc", 100, 200, TicketKind::Single, KeyId(2));

		assert_ne!(base, diff_validity);
		assert_ne!(base, diff_kind);
		assert_ne!(base, diff_key);
	}
}
