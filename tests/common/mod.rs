//! Common test utilities for dbmetrics integration tests.

use std::path::PathBuf;

use duckdb::Connection;
use tempfile::TempDir;

/// Tablespace-like fixture: nulls, a list column and timestamps.
pub const FIXTURE_SQL: &str = "
CREATE TABLE tablespaces (
    tablespace_name VARCHAR,
    block_size INTEGER,
    status VARCHAR,
    size_bytes BIGINT,
    used_pct DOUBLE,
    bigfile BOOLEAN,
    created TIMESTAMP,
    datafiles VARCHAR[]
);
INSERT INTO tablespaces VALUES
    ('SYSTEM', 8192, 'ONLINE', 838860800, 97.5, false, TIMESTAMP '2023-11-05 08:30:00', ['system01.dbf']),
    ('USERS', 8192, 'ONLINE', NULL, 12.25, true, NULL, ['users01.dbf', 'users02.dbf']);
";

/// A DuckDB database file seeded with [`FIXTURE_SQL`].
pub struct Fixture {
    /// Keeps the directory alive for the duration of the test.
    _dir: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("fixture.duckdb");
        let conn = Connection::open(&path).expect("Failed to create fixture database");
        conn.execute_batch(FIXTURE_SQL)
            .expect("Failed to seed fixture database");
        drop(conn);
        Self { _dir: dir, path }
    }

    pub fn locator(&self) -> &str {
        self.path.to_str().expect("temp path is not UTF-8")
    }

    /// Path for a file that does not exist inside the fixture directory.
    pub fn missing(&self) -> PathBuf {
        self.path.with_file_name("missing.duckdb")
    }
}
