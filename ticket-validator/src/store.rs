//! The Validator Runtime's on-device local store (§3A of SPEC_FULL):
//! an embedded SQLite database behind a single mutex-guarded connection,
//! following this workspace's `quoter::database` convention — a
//! `migration` step run on open, `INSERT OR REPLACE` upserts, and
//! bincode/JSON-serialized payload columns rather than a full relational
//! breakout for types that are always read/written whole.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use ticket_primitives::{BloomSnapshot, IssuerKeyRecord, KeyId, OfflineValidation};

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
	#[error("local sqlite store error: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] bincode::Error),
}

pub struct LocalStore {
	connection: Mutex<Connection>,
}

impl LocalStore {
	pub fn open_in_memory() -> Result<Self, LocalStoreError> {
		Self::from_connection(Connection::open_in_memory()?)
	}

	pub fn open(path: &std::path::Path) -> Result<Self, LocalStoreError> {
		Self::from_connection(Connection::open(path)?)
	}

	fn from_connection(connection: Connection) -> Result<Self, LocalStoreError> {
		migrate(&connection)?;
		Ok(LocalStore { connection: Mutex::new(connection) })
	}

	// ---- Cached public keys (§4.7 cold-start contract) ----------------

	pub fn put_keys(&self, keys: &[IssuerKeyRecord]) -> Result<(), LocalStoreError> {
		let mut conn = self.connection.lock().unwrap();
		let tx = conn.transaction()?;
		tx.execute("DELETE FROM keys", [])?;
		for key in keys {
			tx.execute(
				"INSERT OR REPLACE INTO keys (key_id, payload) VALUES (?1, ?2)",
				params![key.key_id.0, bincode::serialize(key)?],
			)?;
		}
		tx.commit()?;
		Ok(())
	}

	pub fn load_keys(&self) -> Result<Vec<IssuerKeyRecord>, LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		let mut stmt = conn.prepare("SELECT payload FROM keys")?;
		let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
		let mut keys = Vec::new();
		for row in rows {
			keys.push(bincode::deserialize(&row?)?);
		}
		Ok(keys)
	}

	pub fn get_key(&self, key_id: KeyId) -> Result<Option<IssuerKeyRecord>, LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		let payload: Option<Vec<u8>> = conn
			.query_row("SELECT payload FROM keys WHERE key_id = ?1", params![key_id.0], |row| row.get(0))
			.optional()?;
		payload.map(|bytes| bincode::deserialize(&bytes).map_err(LocalStoreError::from)).transpose()
	}

	// ---- Cached Bloom snapshot -----------------------------------------

	pub fn put_bloom_snapshot(&self, snapshot: &BloomSnapshot) -> Result<(), LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		conn.execute(
			"INSERT OR REPLACE INTO bloom_snapshot (id, payload) VALUES (0, ?1)",
			params![bincode::serialize(snapshot)?],
		)?;
		Ok(())
	}

	pub fn load_bloom_snapshot(&self) -> Result<Option<BloomSnapshot>, LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		let payload: Option<Vec<u8>> = conn
			.query_row("SELECT payload FROM bloom_snapshot WHERE id = 0", [], |row| row.get(0))
			.optional()?;
		payload.map(|bytes| bincode::deserialize(&bytes).map_err(LocalStoreError::from)).transpose()
	}

	// ---- Offline validation queue ---------------------------------------

	pub fn enqueue(&self, entry: &OfflineValidation) -> Result<(), LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		conn.execute(
			"INSERT OR REPLACE INTO offline_queue (local_id, payload) VALUES (?1, ?2)",
			params![entry.local_id, bincode::serialize(entry)?],
		)?;
		Ok(())
	}

	pub fn pending_entries(&self) -> Result<Vec<OfflineValidation>, LocalStoreError> {
		let conn = self.connection.lock().unwrap();
		let mut stmt = conn.prepare("SELECT payload FROM offline_queue ORDER BY local_id")?;
		let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
		let mut entries = Vec::new();
		for row in rows {
			entries.push(bincode::deserialize::<OfflineValidation>(&row?)?);
		}
		Ok(entries)
	}

	pub fn remove_entries(&self, local_ids: &[String]) -> Result<(), LocalStoreError> {
		let mut conn = self.connection.lock().unwrap();
		let tx = conn.transaction()?;
		for local_id in local_ids {
			tx.execute("DELETE FROM offline_queue WHERE local_id = ?1", params![local_id])?;
		}
		tx.commit()?;
		Ok(())
	}
}

const LATEST_SCHEMA_VERSION: i64 = 1;

fn migrate(connection: &Connection) -> Result<(), LocalStoreError> {
	connection.execute_batch(
		"CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
		 CREATE TABLE IF NOT EXISTS keys (key_id INTEGER PRIMARY KEY, payload BLOB NOT NULL);
		 CREATE TABLE IF NOT EXISTS bloom_snapshot (id INTEGER PRIMARY KEY, payload BLOB NOT NULL);
		 CREATE TABLE IF NOT EXISTS offline_queue (local_id TEXT PRIMARY KEY, payload BLOB NOT NULL);",
	)?;

	let current: Option<i64> =
		connection.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0)).optional()?;
	match current {
		None => {
			connection.execute("INSERT INTO schema_version (version) VALUES (?1)", params![LATEST_SCHEMA_VERSION])?;
		},
		Some(version) if version < LATEST_SCHEMA_VERSION => {
			// No migrations exist yet between version 1 and itself; this
			// arm is where a `migrate_1_to_2` step would go.
			connection.execute("UPDATE schema_version SET version = ?1", params![LATEST_SCHEMA_VERSION])?;
		},
		Some(_) => {},
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use ticket_primitives::{KeyStatus, OfflineDecision, SyncStatus, TicketHash, TicketKind, ValidatorId};

	#[test]
	fn keys_round_trip() {
		let store = LocalStore::open_in_memory().unwrap();
		let key = IssuerKeyRecord {
			key_id: KeyId(1),
			public_key_pem: "pem".to_string(),
			activates_at: 0,
			expires_at: 1000,
			status: KeyStatus::Active,
		};
		store.put_keys(std::slice::from_ref(&key)).unwrap();
		let loaded = store.load_keys().unwrap();
		assert_eq!(loaded.len(), 1);
		assert_eq!(loaded[0].key_id, KeyId(1));
	}

	#[test]
	fn offline_queue_entries_can_be_enqueued_and_removed() {
		let store = LocalStore::open_in_memory().unwrap();
		let entry = OfflineValidation {
			local_id: "a".to_string(),
			validator_id: ValidatorId("v1".into()),
			ticket_hash: TicketHash::of(b"ticket"),
			ticket_kind: TicketKind::Single,
			observed_at: 100,
			local_decision: OfflineDecision::Accepted,
			sync_status: SyncStatus::Pending,
		};
		store.enqueue(&entry).unwrap();
		assert_eq!(store.pending_entries().unwrap().len(), 1);

		store.remove_entries(&["a".to_string()]).unwrap();
		assert!(store.pending_entries().unwrap().is_empty());
	}
}
