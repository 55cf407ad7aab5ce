//! Semantic search over the indexed collection.
use crate::db::models::SearchResult;
use crate::db::{Db, StoreError};
use crate::embedder::{Embedder, EmbedderError};
use crate::error::{IndexError, Result};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;

pub struct QueryExecutor {
    db: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl QueryExecutor {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            db,
            embedder,
            collection: collection.into(),
        }
    }

    /// The `k` chunks nearest to `query`, nearest first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be at least 1".into()));
        }
        if query.trim().is_empty() {
            return Err(IndexError::InvalidArgument("query must not be empty".into()));
        }

        if !self.db.lock().await.has_collection(&self.collection)? {
            return Err(IndexError::CollectionMissing(self.collection.clone()));
        }

        let embedder = self.embedder.clone();
        let owned = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_query(&owned))
            .await
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding task failed: {e}")))??;

        let db = self.db.lock().await;
        let results = db
            .search(&self.collection, &vector, k)
            .map_err(|e| match e {
                StoreError::CollectionMissing(name) => IndexError::CollectionMissing(name),
                other => IndexError::Store(other),
            })?;
        debug!("Query {query:?} matched {} chunks", results.len());
        Ok(results)
    }
}

/// Render hits as `File:` / `Text:` blocks separated by `---` lines.
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No matching documents found.".to_string();
    }

    results
        .iter()
        .map(|r| format!("File: {}\nText: {}", r.entity.filename, r.entity.text))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ChunkRecord, Entity};
    use crate::embedder::mock::MockEmbedder;

    const COLLECTION: &str = "markdown_vectors";

    async fn executor_with(texts: &[&str]) -> QueryExecutor {
        let embedder = Arc::new(MockEmbedder::new(16));
        let mut db = Db::open_in_memory().unwrap();
        db.create_collection(COLLECTION, 16).unwrap();

        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| embedder.embed(t).unwrap()).collect();
        let records: Vec<ChunkRecord<'_>> = texts
            .iter()
            .zip(&vectors)
            .map(|(text, vector)| ChunkRecord {
                text: *text,
                filename: "notes.md",
                path: "/docs/notes.md",
                vector,
            })
            .collect();
        db.insert_chunks(COLLECTION, &records).unwrap();

        QueryExecutor::new(Arc::new(TokioMutex::new(db)), embedder, COLLECTION)
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let executor = executor_with(&["alpha section", "beta section", "gamma section"]).await;
        let results = executor.search("beta section", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity.text, "beta section");
        assert!(results[0].distance < 1e-5);
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn test_k_larger_than_corpus() {
        let executor = executor_with(&["one", "two"]).await;
        let results = executor.search("one", 10).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_k_zero_rejected() {
        let executor = executor_with(&["one"]).await;
        let err = executor.search("one", 0).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
        assert!(err.is_reportable());
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let executor = QueryExecutor::new(
            Arc::new(TokioMutex::new(Db::open_in_memory().unwrap())),
            Arc::new(MockEmbedder::new(16)),
            COLLECTION,
        );
        let err = executor.search("anything", 3).await.unwrap_err();
        assert!(matches!(err, IndexError::CollectionMissing(_)));
    }

    #[test]
    fn test_format_results() {
        let hit = |id, text: &str| SearchResult {
            id,
            distance: 0.1,
            entity: Entity {
                text: text.to_string(),
                filename: "a.md".to_string(),
                path: "/docs/a.md".to_string(),
            },
        };
        let out = format_results(&[hit(1, "first"), hit(2, "second")]);
        assert_eq!(out, "File: a.md\nText: first\n---\nFile: a.md\nText: second");
        assert_eq!(format_results(&[]), "No matching documents found.");
    }
}
