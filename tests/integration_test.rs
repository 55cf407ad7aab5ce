/// End-to-end integration tests for the mdrag pipeline.
///
/// Tests the complete flow:
///   Config → DB → Embedder → IndexWriter → QueryExecutor
use mdrag::config::Config;
use mdrag::db::Db;
use mdrag::embedder::Embedder;
use mdrag::embedder::mock::MockEmbedder;
use mdrag::indexer::core::{IndexOutcome, IndexSummary, IndexWriter, ReindexStrategy};
use mdrag::indexer::ledger::FingerprintStore;
use mdrag::indexer::markdown::MarkdownSplitter;
use mdrag::indexer::paths::canonical_path;
use mdrag::mcp::tools::outcome_json;
use mdrag::query::{QueryExecutor, format_results};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Mutex as TokioMutex;

struct Pipeline {
    config: Config,
    db: Arc<TokioMutex<Db>>,
    writer: IndexWriter,
    query: QueryExecutor,
}

impl Pipeline {
    /// Wire a pipeline the way `main` does, against an on-disk database.
    fn open(data_dir: &Path) -> Self {
        let config = Config {
            data_dir: data_dir.display().to_string(),
            ..Config::default()
        };
        fs::create_dir_all(&config.data_dir).unwrap();

        let db = Arc::new(TokioMutex::new(Db::open(config.db_path()).unwrap()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(config.model.dimensions));
        let writer = IndexWriter::new(
            db.clone(),
            embedder.clone(),
            FingerprintStore::new(config.ledger_path()),
            MarkdownSplitter::new(config.chunk_size, config.chunk_overlap),
            config.collection_name.clone(),
        );
        let query = QueryExecutor::new(db.clone(), embedder, config.collection_name.clone());
        Self {
            config,
            db,
            writer,
            query,
        }
    }

    async fn index(&self, dir: &Path) -> IndexOutcome {
        self.writer
            .run(dir, false, ReindexStrategy::Incremental)
            .await
            .unwrap()
    }

    async fn chunk_count(&self) -> usize {
        let db = self.db.lock().await;
        db.count_chunks(&self.config.collection_name, None).unwrap()
    }
}

fn completed(outcome: IndexOutcome) -> IndexSummary {
    match outcome {
        IndexOutcome::Completed(summary) => summary,
        IndexOutcome::UpToDate => panic!("expected the run to touch the store"),
    }
}

fn words(n: usize, prefix: &str) -> String {
    (0..n)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index two files, re-run without changes, then edit one of them.
#[tokio::test]
async fn test_incremental_scenario() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    let a = docs.path().join("a.md");
    fs::write(&a, format!("# Alpha\n\n{}", words(500, "alpha"))).unwrap();
    fs::write(docs.path().join("b.md"), format!("# Beta\n\n{}", words(50, "beta"))).unwrap();

    let pipeline = Pipeline::open(data.path());

    // 1. First run indexes both files
    let first = pipeline.index(docs.path()).await;
    let report = outcome_json(&first);
    assert_eq!(report["message"], "Incremental update");
    assert_eq!(report["processed_files"], 2);
    assert!(report["total_chunks"].as_u64().unwrap() >= 2);
    let after_first = pipeline.chunk_count().await;

    // 2. Nothing changed
    let second = pipeline.index(docs.path()).await;
    assert_eq!(
        outcome_json(&second)["message"],
        "Already up to date, no changes detected"
    );
    assert_eq!(pipeline.chunk_count().await, after_first);

    // 3. Edit a.md
    fs::write(&a, "# Alpha\n\nrewritten from scratch").unwrap();
    let third = completed(pipeline.index(docs.path()).await);
    assert_eq!(third.processed_files(), 1);
    assert_eq!(third.processed_filenames(), vec!["a.md"]);

    let a_key = canonical_path(&a).unwrap();
    let db = pipeline.db.lock().await;
    let texts = db
        .chunk_texts(&pipeline.config.collection_name, &a_key)
        .unwrap();
    assert_eq!(texts, vec!["# Alpha\n\nrewritten from scratch"]);
    assert!(texts.iter().all(|t| !t.contains("alpha499")));
}

/// After a successful run every ledger entry has chunks and vice versa.
#[tokio::test]
async fn test_ledger_matches_store() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    for (name, body) in [("one.md", "# One\nfirst"), ("two.md", "# Two\nsecond"), ("three.md", "third")] {
        fs::write(docs.path().join(name), body).unwrap();
    }

    let pipeline = Pipeline::open(data.path());
    pipeline.index(docs.path()).await;
    fs::remove_file(docs.path().join("two.md")).unwrap();
    fs::write(docs.path().join("three.md"), "third, revised").unwrap();
    let summary = completed(pipeline.index(docs.path()).await);
    assert_eq!(summary.removed.len(), 1);

    let ledger = pipeline.writer.ledger().load().unwrap();
    let ledger_paths: Vec<String> = ledger.paths().map(str::to_string).collect();

    let db = pipeline.db.lock().await;
    let stored: Vec<String> = db
        .indexed_paths(&pipeline.config.collection_name)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(ledger_paths, stored);
    assert_eq!(stored.len(), 2);
}

/// A full rebuild starts from an empty store and ledger.
#[tokio::test]
async fn test_force_reindex() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    fs::write(docs.path().join("a.md"), "# A\nalpha").unwrap();
    fs::write(docs.path().join("b.md"), "# B\nbeta").unwrap();

    let pipeline = Pipeline::open(data.path());
    pipeline.index(docs.path()).await;
    let before = pipeline.chunk_count().await;

    let outcome = pipeline
        .writer
        .run(docs.path(), false, ReindexStrategy::Full)
        .await
        .unwrap();
    let report = outcome_json(&outcome);
    assert_eq!(report["message"], "Full reindex");
    assert_eq!(report["processed_files"], 2);
    assert_eq!(pipeline.chunk_count().await, before);

    // The rebuild recorded its files, so an incremental run is a no-op
    assert!(matches!(pipeline.index(docs.path()).await, IndexOutcome::UpToDate));
}

/// Subdirectories are only visited with `recursive`.
#[tokio::test]
async fn test_recursive_indexing() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    fs::write(docs.path().join("top.md"), "top").unwrap();
    fs::create_dir(docs.path().join("nested")).unwrap();
    fs::write(docs.path().join("nested/deep.md"), "deep").unwrap();

    let pipeline = Pipeline::open(data.path());
    let flat = completed(pipeline.index(docs.path()).await);
    assert_eq!(flat.processed_filenames(), vec!["top.md"]);

    let deep = completed(
        pipeline
            .writer
            .run(docs.path(), true, ReindexStrategy::Incremental)
            .await
            .unwrap(),
    );
    assert_eq!(deep.processed_filenames(), vec!["deep.md"]);
}

/// State survives a restart: a fresh pipeline over the same data directory
/// sees the previous run's ledger and chunks.
#[tokio::test]
async fn test_state_persists_across_restarts() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    fs::write(docs.path().join("a.md"), "# A\nalpha").unwrap();

    {
        let pipeline = Pipeline::open(data.path());
        pipeline.index(docs.path()).await;
    }

    let reopened = Pipeline::open(data.path());
    assert!(matches!(reopened.index(docs.path()).await, IndexOutcome::UpToDate));
    assert_eq!(reopened.chunk_count().await, 1);
}

/// Search returns the stored chunk whose text matches the query, first.
#[tokio::test]
async fn test_search_after_indexing() {
    let docs = tempdir().unwrap();
    let data = tempdir().unwrap();
    fs::write(
        docs.path().join("guide.md"),
        "# Install\nRun the installer.\n\n# Usage\nCall the search tool.",
    )
    .unwrap();
    fs::write(docs.path().join("api.md"), "# API\nindex_documents and search_documents").unwrap();

    let pipeline = Pipeline::open(data.path());
    pipeline.index(docs.path()).await;

    // The mock embedder maps identical text to identical vectors
    let results = pipeline
        .query
        .search("# Usage\nCall the search tool.", 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entity.filename, "guide.md");
    assert_eq!(results[0].entity.text, "# Usage\nCall the search tool.");

    let rendered = format_results(&results);
    assert!(rendered.starts_with("File: guide.md\nText: # Usage"));
    assert_eq!(rendered.matches("\n---\n").count(), 1);
}
