//! Test-only helpers shared across the workspace's crates.

use std::path::PathBuf;

/// A fresh temp directory plus the path to a file inside it that does not
/// yet exist, for tests that open/create an on-disk store (RocksDB, SQLite).
pub fn new_temp_directory_with_nonexistent_file() -> (tempfile::TempDir, PathBuf) {
	let dir = tempfile::tempdir().expect("failed to create temp dir");
	let file = dir.path().join("store");
	(dir, file)
}

/// Installs a `tracing` subscriber for test output; safe to call more than
/// once per process (later calls are no-ops).
pub fn init_test_logger() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
