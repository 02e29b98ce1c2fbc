//! Generic RocksDB key-value layer underneath the [`crate::Ledger`]. Mirrors
//! the column-family-plus-fixed-prefix scheme used for the engine's
//! persistent key-value store: a single `DATA_COLUMN` holding every entity
//! type behind a 10-byte ASCII prefix, and a `METADATA_COLUMN` holding only
//! the schema version.

use std::collections::HashMap;
use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::LedgerError;

/// Every key in `DATA_COLUMN` begins with one of these, so a single
/// `prefix_iterator_cf` call lists exactly one entity type.
pub const PREFIX_SIZE: usize = 10;

pub const KEY_RECORD_PREFIX: &[u8; PREFIX_SIZE] = b"keyrecord_";
pub const RECEIPT_PREFIX: &[u8; PREFIX_SIZE] = b"receipt___";
pub const RECEIPT_INDEX_PREFIX: &[u8; PREFIX_SIZE] = b"receiptix_";
pub const ISSUED_SLOT_PREFIX: &[u8; PREFIX_SIZE] = b"slot______";
pub const SPENT_PREFIX: &[u8; PREFIX_SIZE] = b"spent_____";
pub const REVOKED_PREFIX: &[u8; PREFIX_SIZE] = b"revoked___";
pub const BLOOM_PREFIX: &[u8; PREFIX_SIZE] = b"bloom_____";
pub const AUDIT_PREFIX: &[u8; PREFIX_SIZE] = b"audit_____";
pub const OBSERVATION_PREFIX: &[u8; PREFIX_SIZE] = b"observe___";
pub const RECONCILE_PREFIX: &[u8; PREFIX_SIZE] = b"reconcile_";

const DATA_COLUMN: &str = "data";
const METADATA_COLUMN: &str = "metadata";

const DB_SCHEMA_VERSION_KEY: &[u8; 17] = b"db_schema_version";

/// Bumped whenever the on-disk encoding of an entity changes. There are no
/// migrations yet; the constant and the (empty) migration hook exist so the
/// next schema change has somewhere to go, following the same
/// open-then-migrate shape as the rest of this workspace's storage layers.
const LATEST_SCHEMA_VERSION: u32 = 1;

const BACKUPS_DIRECTORY: &str = "backups";

pub struct Store {
	db: DB,
}

impl Store {
	pub fn open(db_path: &Path) -> Result<Self, LedgerError> {
		let is_existing_db = db_path.exists();

		let mut data_opts = Options::default();
		data_opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_SIZE));

		let cfs: HashMap<String, ColumnFamilyDescriptor> = HashMap::from_iter([
			(METADATA_COLUMN.to_string(), ColumnFamilyDescriptor::new(METADATA_COLUMN, Options::default())),
			(DATA_COLUMN.to_string(), ColumnFamilyDescriptor::new(DATA_COLUMN, data_opts)),
		]);

		let mut open_opts = Options::default();
		open_opts.create_missing_column_families(true);
		open_opts.create_if_missing(true);

		let db = DB::open_cf_descriptors(&open_opts, db_path, cfs.into_values())?;

		if is_existing_db {
			backup_before_migrate(db_path)?;
		} else {
			let mut batch = WriteBatch::default();
			put_schema_version_to_batch(&db, &mut batch, LATEST_SCHEMA_VERSION);
			db.write(batch)?;
		}

		migrate_to_latest(&db)?;

		Ok(Store { db })
	}

	pub fn put<T: Serialize>(&self, prefix: &[u8; PREFIX_SIZE], key: &[u8], value: &T) -> Result<(), LedgerError> {
		let key_with_prefix = [prefix.as_slice(), key].concat();
		self.db.put_cf(self.data_cf(), key_with_prefix, bincode::serialize(value)?)?;
		Ok(())
	}

	pub fn get<T: DeserializeOwned>(&self, prefix: &[u8; PREFIX_SIZE], key: &[u8]) -> Result<Option<T>, LedgerError> {
		let key_with_prefix = [prefix.as_slice(), key].concat();
		self.db
			.get_cf(self.data_cf(), key_with_prefix)?
			.map(|bytes| bincode::deserialize(&bytes).map_err(LedgerError::from))
			.transpose()
	}

	pub fn iter_prefix<'a, T: DeserializeOwned + 'a>(
		&'a self,
		prefix: &[u8; PREFIX_SIZE],
	) -> impl Iterator<Item = (Vec<u8>, Result<T, LedgerError>)> + 'a {
		let prefix = *prefix;
		self.db
			.prefix_iterator_cf(self.data_cf(), prefix.as_slice())
			.filter_map(|result| result.ok())
			.filter(move |(key, _)| key.starts_with(prefix.as_slice()))
			.map(move |(key, value)| {
				(Vec::from(&key[PREFIX_SIZE..]), bincode::deserialize(&value).map_err(LedgerError::from))
			})
	}

	pub fn delete(&self, prefix: &[u8; PREFIX_SIZE], key: &[u8]) -> Result<(), LedgerError> {
		let key_with_prefix = [prefix.as_slice(), key].concat();
		self.db.delete_cf(self.data_cf(), key_with_prefix)?;
		Ok(())
	}

	pub fn write_batch(&self) -> StoreBatch<'_> {
		StoreBatch { db: &self.db, batch: WriteBatch::default() }
	}

	fn data_cf(&self) -> &ColumnFamily {
		self.db.cf_handle(DATA_COLUMN).expect("data column family was created on open")
	}

	fn metadata_cf(&self) -> &ColumnFamily {
		self.db.cf_handle(METADATA_COLUMN).expect("metadata column family was created on open")
	}
}

pub struct StoreBatch<'a> {
	db: &'a DB,
	batch: WriteBatch,
}

impl<'a> StoreBatch<'a> {
	pub fn put<T: Serialize>(&mut self, prefix: &[u8; PREFIX_SIZE], key: &[u8], value: &T) -> Result<(), LedgerError> {
		let key_with_prefix = [prefix.as_slice(), key].concat();
		let cf = self.db.cf_handle(DATA_COLUMN).expect("data column family was created on open");
		self.batch.put_cf(cf, key_with_prefix, bincode::serialize(value)?);
		Ok(())
	}

	pub fn commit(self) -> Result<(), LedgerError> {
		self.db.write(self.batch)?;
		Ok(())
	}
}

fn put_schema_version_to_batch(db: &DB, batch: &mut WriteBatch, version: u32) {
	let cf = db.cf_handle(METADATA_COLUMN).expect("metadata column family was created on open");
	batch.put_cf(cf, DB_SCHEMA_VERSION_KEY, version.to_be_bytes());
}

fn get_schema_version(db: &DB) -> Result<u32, LedgerError> {
	let cf = db.cf_handle(METADATA_COLUMN).expect("metadata column family was created on open");
	Ok(db
		.get_cf(cf, DB_SCHEMA_VERSION_KEY)?
		.map(|bytes| u32::from_be_bytes(bytes.try_into().expect("schema version is always 4 bytes")))
		.unwrap_or(0))
}

/// No-op today; bumps the stored version to [`LATEST_SCHEMA_VERSION`] once a
/// migration step exists for every version gap between what's on disk and
/// latest.
fn migrate_to_latest(db: &DB) -> Result<(), LedgerError> {
	let current = get_schema_version(db)?;
	if current < LATEST_SCHEMA_VERSION {
		let cf = db.cf_handle(METADATA_COLUMN).expect("metadata column family was created on open");
		db.put_cf(cf, DB_SCHEMA_VERSION_KEY, LATEST_SCHEMA_VERSION.to_be_bytes())?;
	}
	Ok(())
}

fn backup_before_migrate(db_path: &Path) -> Result<(), LedgerError> {
	let backups_dir = db_path
		.parent()
		.unwrap_or_else(|| Path::new("."))
		.join(BACKUPS_DIRECTORY);
	std::fs::create_dir_all(&backups_dir)
		.map_err(|e| LedgerError::Unavailable(format!("failed to create backups directory: {e}")))?;

	let options = fs_extra::dir::CopyOptions::new();
	fs_extra::dir::copy(db_path, &backups_dir, &options)
		.map_err(|e| LedgerError::Unavailable(format!("failed to back up database before migration: {e}")))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use ticket_primitives::KeyId;

	#[test]
	fn put_then_get_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let store = Store::open(&dir.path().join("db")).unwrap();

		store.put(KEY_RECORD_PREFIX, &1u32.to_be_bytes(), &KeyId(1)).unwrap();
		let loaded: Option<KeyId> = store.get(KEY_RECORD_PREFIX, &1u32.to_be_bytes()).unwrap();
		assert_eq!(loaded, Some(KeyId(1)));
	}

	#[test]
	fn reopening_an_existing_db_creates_a_backup() {
		let dir = tempfile::tempdir().unwrap();
		let db_path = dir.path().join("db");
		{
			let _store = Store::open(&db_path).unwrap();
		}
		let _store = Store::open(&db_path).unwrap();
		assert!(dir.path().join(BACKUPS_DIRECTORY).exists());
	}
}
