use super::{Db, Result, StoreError, models::ChunkRecord, serialize_vector};
use rusqlite::{Connection, params};
use std::collections::BTreeSet;

/// Result of [`Db::replace_chunks`].
#[derive(Debug, Default)]
pub struct ReplaceReport {
    /// Ids of the inserted records, in input order.
    pub ids: Vec<i64>,
    /// Stale chunks removed across all paths.
    pub removed: usize,
    /// Paths whose stale chunks could not be deleted. Their new records were
    /// still inserted.
    pub failed: Vec<(String, StoreError)>,
}

fn check_dimension(records: &[ChunkRecord<'_>], dimension: usize) -> Result<()> {
    match records.iter().find(|r| r.vector.len() != dimension) {
        Some(bad) => Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

fn insert_records(
    conn: &Connection,
    name: &str,
    records: &[ChunkRecord<'_>],
) -> rusqlite::Result<Vec<i64>> {
    let mut insert_chunk = conn.prepare(&format!(
        "INSERT INTO {name}_chunks (text, filename, path) VALUES (?, ?, ?)"
    ))?;
    let mut insert_vec = conn.prepare(&format!(
        "INSERT INTO {name}_vec (rowid, embedding) VALUES (?, ?)"
    ))?;

    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        insert_chunk.execute(params![record.text, record.filename, record.path])?;
        let chunk_id = conn.last_insert_rowid();
        insert_vec.execute(params![chunk_id, serialize_vector(record.vector)])?;
        ids.push(chunk_id);
    }
    Ok(ids)
}

fn delete_path(conn: &Connection, name: &str, path: &str) -> rusqlite::Result<usize> {
    // vec0 tables do not take part in foreign-key cascades
    conn.execute(
        &format!(
            "DELETE FROM {name}_vec WHERE rowid IN (SELECT id FROM {name}_chunks WHERE path = ?)"
        ),
        params![path],
    )?;
    conn.execute(
        &format!("DELETE FROM {name}_chunks WHERE path = ?"),
        params![path],
    )
}

impl Db {
    /// Inserts a batch of chunk records in one transaction.
    ///
    /// Returns the store-assigned ids in input order. The whole batch is
    /// rejected if any vector has the wrong dimension.
    pub fn insert_chunks(
        &mut self,
        collection: &str,
        records: &[ChunkRecord<'_>],
    ) -> Result<Vec<i64>> {
        let (name, dimension) = self.require_collection(collection)?;
        check_dimension(records, dimension)?;

        let tx = self.conn.transaction()?;
        let ids = insert_records(&tx, name, records)?;
        tx.commit()?;
        Ok(ids)
    }

    /// Deletes every chunk whose `path` equals `path`. Returns the number removed.
    pub fn delete_by_path(&mut self, collection: &str, path: &str) -> Result<usize> {
        let (name, _) = self.require_collection(collection)?;

        let tx = self.conn.transaction()?;
        let removed = delete_path(&tx, name, path)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Deletes the chunks of every path in `stale_paths` and inserts `records`,
    /// all in one transaction.
    ///
    /// A failed delete is rolled back on its own and reported in
    /// [`ReplaceReport::failed`]. A failed insert rolls back everything, so the
    /// collection is left exactly as it was.
    pub fn replace_chunks(
        &mut self,
        collection: &str,
        stale_paths: &[String],
        records: &[ChunkRecord<'_>],
    ) -> Result<ReplaceReport> {
        let (name, dimension) = self.require_collection(collection)?;
        check_dimension(records, dimension)?;

        let mut report = ReplaceReport::default();
        let mut tx = self.conn.transaction()?;
        for path in stale_paths {
            let sp = tx.savepoint()?;
            match delete_path(&sp, name, path) {
                Ok(removed) => {
                    sp.commit()?;
                    report.removed += removed;
                }
                // Dropping the savepoint rolls the partial delete back
                Err(e) => report.failed.push((path.clone(), e.into())),
            }
        }
        report.ids = insert_records(&tx, name, records)?;
        tx.commit()?;
        Ok(report)
    }

    /// Number of chunks in a collection, optionally restricted to one path.
    pub fn count_chunks(&self, collection: &str, path: Option<&str>) -> Result<usize> {
        let (name, _) = self.require_collection(collection)?;
        let count: i64 = match path {
            Some(p) => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {name}_chunks WHERE path = ?"),
                params![p],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {name}_chunks"),
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    /// Distinct source paths that currently have chunks in the collection.
    pub fn indexed_paths(&self, collection: &str) -> Result<BTreeSet<String>> {
        let (name, _) = self.require_collection(collection)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT DISTINCT path FROM {name}_chunks"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut paths = BTreeSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    /// Texts stored for one path, in insertion order.
    pub fn chunk_texts(&self, collection: &str, path: &str) -> Result<Vec<String>> {
        let (name, _) = self.require_collection(collection)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT text FROM {name}_chunks WHERE path = ? ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;

        let mut texts = Vec::new();
        for row in rows {
            texts.push(row?);
        }
        Ok(texts)
    }
}
