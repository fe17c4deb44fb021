use crate::quality::error::{QualityError, Result};
use crate::quality::schema;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A `(server, schema)` pair naming one production dataset.
///
/// `server` is the data directory holding dataset files; `schema` is the
/// dataset name, stored as `<server>/<schema>.db`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub server: String,
    pub schema: String,
}

impl DataSource {
    pub fn new(server: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            schema: schema.into(),
        }
    }

    /// Path of the dataset file, with `~` expanded in the server directory.
    pub fn db_path(&self) -> PathBuf {
        let server = shellexpand::tilde(&self.server);
        Path::new(server.as_ref()).join(format!("{}.db", self.schema))
    }

    fn connection_error(&self, source: rusqlite::Error) -> QualityError {
        QualityError::Connection {
            server: self.server.clone(),
            schema: self.schema.clone(),
            source,
        }
    }
}

/// Connection to one spill dataset.
pub struct SpillStore {
    conn: Connection,
    source: DataSource,
    path: Option<PathBuf>,
}

impl SpillStore {
    /// Open an existing dataset for reading and writing. Never creates a file
    /// and leaves its journal mode alone.
    pub fn open(source: &DataSource) -> Result<Self> {
        let path = source.db_path();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| source.connection_error(e))?;
        conn.execute_batch(schema::CONNECTION_PRAGMAS)
            .map_err(|e| source.connection_error(e))?;
        tracing::debug!(path = %path.display(), "opened dataset read-write");
        Ok(Self {
            conn,
            source: source.clone(),
            path: Some(path),
        })
    }

    /// Open an existing dataset read-only.
    ///
    /// Parallel rule workers each hold one of these.
    pub fn open_read_only(source: &DataSource) -> Result<Self> {
        let path = source.db_path();
        let conn = Self::open_read_only_conn(&path).map_err(|e| source.connection_error(e))?;
        Ok(Self {
            conn,
            source: source.clone(),
            path: Some(path),
        })
    }

    /// Create (or open) a dataset file and make sure the dataset tables exist.
    pub fn create(source: &DataSource) -> Result<Self> {
        let path = source.db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QualityError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(&path).map_err(|e| source.connection_error(e))?;
        conn.execute_batch(schema::JOURNAL_PRAGMA)
            .and_then(|()| conn.execute_batch(schema::CONNECTION_PRAGMAS))
            .map_err(|e| source.connection_error(e))?;
        let store = Self {
            conn,
            source: source.clone(),
            path: Some(path),
        };
        store.ensure_dataset_schema()?;
        Ok(store)
    }

    /// A private in-memory dataset with every table created.
    pub fn open_in_memory() -> Result<Self> {
        let source = DataSource::new(":memory:", "memory");
        let conn = Connection::open_in_memory().map_err(|e| source.connection_error(e))?;
        let store = Self {
            conn,
            source,
            path: None,
        };
        store.ensure_dataset_schema()?;
        Ok(store)
    }

    pub(crate) fn open_read_only_conn(path: &Path) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn ensure_dataset_schema(&self) -> Result<()> {
        for ddl in schema::dataset_ddl() {
            self.conn.execute_batch(ddl)?;
        }
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Path of the backing file; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `table` exists. The comparison is case-sensitive.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            [table, column],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn db_path_joins_server_and_schema() {
        let source = DataSource::new("/data/e906", "run_011040_R005_roadset62");
        assert_eq!(
            source.db_path(),
            PathBuf::from("/data/e906/run_011040_R005_roadset62.db")
        );
    }

    #[test]
    fn open_missing_dataset_is_connection_error() {
        let tmp = TempDir::new().unwrap();
        let source = DataSource::new(tmp.path().to_string_lossy(), "absent");
        let err = SpillStore::open(&source).err().unwrap();
        match err {
            QualityError::Connection { server, schema, .. } => {
                assert_eq!(schema, "absent");
                assert_eq!(server, tmp.path().to_string_lossy());
            }
            other => panic!("expected connection error, got {other}"),
        }
        assert!(!source.db_path().exists());
    }

    #[test]
    fn open_keeps_existing_journal_mode() {
        let tmp = TempDir::new().unwrap();
        let source = DataSource::new(tmp.path().to_string_lossy(), "legacy");
        {
            let conn = Connection::open(source.db_path()).unwrap();
            conn.execute_batch(schema::SPILL_DDL).unwrap();
        }
        let journal = |store: &SpillStore| -> String {
            store
                .conn()
                .query_row("PRAGMA journal_mode", [], |r| r.get(0))
                .unwrap()
        };

        let store = SpillStore::open(&source).unwrap();
        assert_eq!(journal(&store), "delete");
        drop(store);
        assert!(!tmp.path().join("legacy.db-wal").exists());

        let created = DataSource::new(tmp.path().to_string_lossy(), "fresh");
        assert_eq!(journal(&SpillStore::create(&created).unwrap()), "wal");
    }

    #[test]
    fn create_then_open_read_only() {
        let tmp = TempDir::new().unwrap();
        let source = DataSource::new(tmp.path().to_string_lossy(), "roadset57_test");
        let store = SpillStore::create(&source).unwrap();
        store
            .conn()
            .execute("INSERT INTO Spill VALUES (1, 1, 'EOS')", [])
            .unwrap();
        drop(store);

        let ro = SpillStore::open_read_only(&source).unwrap();
        assert!(ro.table_exists("Spill").unwrap());
        assert!(ro.conn().execute("DELETE FROM Spill", []).is_err());
    }

    #[test]
    fn table_exists_is_case_sensitive() {
        let store = SpillStore::open_in_memory().unwrap();
        assert!(store.table_exists("BeamDAQ").unwrap());
        assert!(!store.table_exists("beamdaq").unwrap());
        assert!(!store.table_exists("bad_spills").unwrap());
    }

    #[test]
    fn has_column_reads_table_info() {
        let store = SpillStore::open_in_memory().unwrap();
        assert!(store.has_column("Scaler", "spillID").unwrap());
        assert!(!store.has_column("Scaler", "dimuonID").unwrap());
    }
}
