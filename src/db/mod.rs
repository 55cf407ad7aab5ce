//! Vector store backed by SQLite and sqlite-vec.
//!
//! A store holds any number of named collections. Each collection is a
//! metadata row in `collections`, a `<name>_chunks` table with the record
//! fields and a `<name>_vec` vec0 table keyed by the chunk id.
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{LazyLock, Once};
use thiserror::Error;
use tracing::info;

pub mod chunks;
pub mod models;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

static INIT_VEC: Once = Once::new();

static COLLECTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"));

/// Errors raised by the vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("collection not found: {0}")]
    CollectionMissing(String),

    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A wrapper around a SQLite connection initialized with sqlite-vec and the store schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing vector store: {}", path.display());

        init_sqlite_vec();

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Whether a collection with this name exists.
    pub fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collection_dimension(name)?.is_some())
    }

    /// Vector dimension of a collection, `None` if it does not exist.
    pub fn collection_dimension(&self, name: &str) -> Result<Option<usize>> {
        let dim: Option<i64> = self
            .conn
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    /// Create an empty collection with a fixed vector dimension.
    pub fn create_collection(&mut self, name: &str, dimension: usize) -> Result<()> {
        let name = validate_collection_name(name)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO collections (name, dimension) VALUES (?, ?)",
            params![name, dimension as i64],
        )?;
        tx.execute_batch(&format!(
            r#"
            CREATE TABLE {name}_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                filename TEXT NOT NULL,
                path TEXT NOT NULL
            );
            CREATE INDEX idx_{name}_path ON {name}_chunks(path);
            CREATE VIRTUAL TABLE {name}_vec USING vec0(
                embedding FLOAT[{dimension}]
            );
            "#
        ))?;
        tx.commit()?;
        info!("Created collection {name} (dimension {dimension})");
        Ok(())
    }

    /// Create the collection unless it already exists. Never drops data.
    ///
    /// Returns `true` when the collection was created.
    pub fn ensure_collection(&mut self, name: &str, dimension: usize) -> Result<bool> {
        match self.collection_dimension(name)? {
            Some(existing) if existing != dimension => Err(StoreError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => Ok(false),
            None => {
                self.create_collection(name, dimension)?;
                Ok(true)
            }
        }
    }

    /// Drop a collection and all of its records. Returns `false` if it did not exist.
    pub fn drop_collection(&mut self, name: &str) -> Result<bool> {
        let name = validate_collection_name(name)?;
        if !self.has_collection(name)? {
            return Ok(false);
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {name}_vec; DROP TABLE IF EXISTS {name}_chunks;"
        ))?;
        tx.execute("DELETE FROM collections WHERE name = ?", params![name])?;
        tx.commit()?;
        info!("Dropped collection {name}");
        Ok(true)
    }

    /// Resolve a collection for a read or write, checking it exists.
    pub(crate) fn require_collection<'n>(&self, name: &'n str) -> Result<(&'n str, usize)> {
        let name = validate_collection_name(name)?;
        match self.collection_dimension(name)? {
            Some(dim) => Ok((name, dim)),
            None => Err(StoreError::CollectionMissing(name.to_string())),
        }
    }
}

/// Collection names are interpolated into table names, so they are restricted
/// to SQL identifier characters.
fn validate_collection_name(name: &str) -> Result<&str> {
    if COLLECTION_NAME_RE.is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidCollectionName(name.to_string()))
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory().expect("Failed to open in-memory DB");
        let tables: usize = db
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = 'collections'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_collection_lifecycle() {
        let mut db = Db::open_in_memory().unwrap();
        assert!(!db.has_collection("docs").unwrap());

        db.create_collection("docs", 8).unwrap();
        assert!(db.has_collection("docs").unwrap());
        assert_eq!(db.collection_dimension("docs").unwrap(), Some(8));

        // ensure_collection is a no-op on an existing collection
        assert!(!db.ensure_collection("docs", 8).unwrap());

        assert!(db.drop_collection("docs").unwrap());
        assert!(!db.has_collection("docs").unwrap());
        assert!(!db.drop_collection("docs").unwrap());

        // Recreate after drop works
        assert!(db.ensure_collection("docs", 8).unwrap());
    }

    #[test]
    fn test_ensure_collection_dimension_mismatch() {
        let mut db = Db::open_in_memory().unwrap();
        db.create_collection("docs", 8).unwrap();
        let err = db.ensure_collection("docs", 16).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 8,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_invalid_collection_name() {
        let mut db = Db::open_in_memory().unwrap();
        let err = db.create_collection("docs; DROP TABLE x", 8).unwrap_err();
        assert!(matches!(err, StoreError::InvalidCollectionName(_)));
        assert!(db.create_collection("1docs", 8).is_err());
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }
}
