use super::models::{Entity, SearchResult};
use super::{Db, Result, StoreError, serialize_vector};
use rusqlite::params;

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchResult> {
    Ok(SearchResult {
        id: row.get(0)?,
        entity: Entity {
            text: row.get(1)?,
            filename: row.get(2)?,
            path: row.get(3)?,
        },
        // Float rounding can leave identical vectors a hair below zero
        distance: row.get::<_, f64>(4)?.max(0.0),
    })
}

impl Db {
    /// Return the `top_k` records closest to `query_vector` by cosine distance,
    /// nearest first.
    pub fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let (name, dimension) = self.require_collection(collection)?;
        if query_vector.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: query_vector.len(),
            });
        }

        let query = format!(
            r#"
            SELECT
                c.id,
                c.text,
                c.filename,
                c.path,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM {name}_vec v
            JOIN {name}_chunks c ON v.rowid = c.id
            ORDER BY distance ASC, c.id ASC
            LIMIT ?
            "#
        );

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            map_search_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}
