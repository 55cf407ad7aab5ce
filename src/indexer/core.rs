use crate::db::{Db, StoreError};
use crate::db::models::ChunkRecord;
use crate::embedder::{Embedder, EmbedderError};
use crate::error::{IndexError, Result};
use crate::indexer::changes::{ChangeDetector, list_markdown_files};
use crate::indexer::ledger::{FileFingerprint, FingerprintStore};
use crate::indexer::markdown::{ChunkingReport, MarkdownSplitter};
use crate::indexer::paths::{canonical_path, file_name};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

/// How an indexing run selects its input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexStrategy {
    /// Drop the collection and re-embed every matching file.
    Full,
    /// Only process files whose fingerprint changed since the last run.
    Incremental,
}

impl ReindexStrategy {
    #[must_use]
    pub fn from_force(force: bool) -> Self {
        if force { Self::Full } else { Self::Incremental }
    }
}

/// Per-file result of an indexing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Fresh chunks stored and fingerprint recorded.
    Indexed { chunks: usize },
    /// Fresh chunks stored, but stale chunks could not be removed. The file is
    /// left out of the ledger so the next run retries it.
    Partial { chunks: usize, reason: String },
    /// The file could not be read; nothing was stored for it.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub filename: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Summary of a run that touched the store.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub strategy: ReindexStrategy,
    pub files: Vec<FileOutcome>,
    /// Paths of deleted files whose chunks and ledger entries were dropped.
    pub removed: Vec<String>,
    pub chunks_written: usize,
}

impl IndexSummary {
    pub fn message(&self) -> &'static str {
        match self.strategy {
            ReindexStrategy::Full => "Full reindex",
            ReindexStrategy::Incremental => "Incremental update",
        }
    }

    fn with_status<'a>(
        &'a self,
        pred: impl Fn(&FileStatus) -> bool + 'a,
    ) -> impl Iterator<Item = &'a FileOutcome> + 'a {
        self.files.iter().filter(move |f| pred(&f.status))
    }

    /// Files whose fresh chunks were stored, fully or partially.
    pub fn processed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.with_status(|s| !matches!(s, FileStatus::Skipped { .. }))
    }

    pub fn processed_files(&self) -> usize {
        self.processed().count()
    }

    pub fn processed_filenames(&self) -> Vec<String> {
        self.processed().map(|f| f.filename.clone()).collect()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileOutcome> {
        self.with_status(|s| matches!(s, FileStatus::Skipped { .. }))
    }

    pub fn partial(&self) -> impl Iterator<Item = &FileOutcome> {
        self.with_status(|s| matches!(s, FileStatus::Partial { .. }))
    }

    /// Every input file was indexed and recorded.
    pub fn is_complete(&self) -> bool {
        self.files
            .iter()
            .all(|f| matches!(f.status, FileStatus::Indexed { .. }))
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum IndexOutcome {
    Completed(IndexSummary),
    /// Incremental run found nothing to do; the store was not touched.
    UpToDate,
}

/// Reconciles the vector store with the Markdown files of a directory and
/// keeps the fingerprint ledger in step with it.
pub struct IndexWriter {
    db: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
    ledger: FingerprintStore,
    splitter: MarkdownSplitter,
    collection: String,
    // Held for a whole run: runs read and rewrite the ledger.
    run_lock: TokioMutex<()>,
}

impl IndexWriter {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        embedder: Arc<dyn Embedder>,
        ledger: FingerprintStore,
        splitter: MarkdownSplitter,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            db,
            embedder,
            ledger,
            splitter,
            collection: collection.into(),
            run_lock: TokioMutex::new(()),
        }
    }

    pub fn ledger(&self) -> &FingerprintStore {
        &self.ledger
    }

    /// Index the Markdown files in `directory`.
    ///
    /// Chunking and embedding finish before the store is touched, so a failed
    /// embedding leaves both the store and the ledger as they were.
    pub async fn run(
        &self,
        directory: &Path,
        recursive: bool,
        strategy: ReindexStrategy,
    ) -> Result<IndexOutcome> {
        let _guard = self.run_lock.lock().await;

        let dir = resolve_directory(directory)?;
        info!("Indexing {} ({strategy:?}, recursive={recursive})", dir.display());

        let (candidates, gone) = match strategy {
            ReindexStrategy::Full => (list_markdown_files(&dir, recursive), Vec::new()),
            ReindexStrategy::Incremental => {
                let detector = ChangeDetector::new(self.ledger.clone());
                let changed = detector.changed_files(&dir, recursive)?;
                let gone = detector.removed_files(&dir, recursive)?;
                if changed.is_empty() && gone.is_empty() {
                    info!("{} is up to date", dir.display());
                    return Ok(IndexOutcome::UpToDate);
                }
                (changed, gone)
            }
        };
        let stale: Vec<String> = match strategy {
            ReindexStrategy::Full => Vec::new(),
            ReindexStrategy::Incremental => candidates.iter().chain(&gone).cloned().collect(),
        };

        let (report, vectors) = self.chunk_and_embed(candidates).await?;
        let records: Vec<ChunkRecord<'_>> = report
            .chunks()
            .zip(&vectors)
            .map(|(chunk, vector)| ChunkRecord {
                text: &chunk.text,
                filename: &chunk.filename,
                path: &chunk.path,
                vector,
            })
            .collect();

        let dimension = self.embedder.dimensions();
        let replaced = {
            let mut db = self.db.lock().await;
            match strategy {
                ReindexStrategy::Full => {
                    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
                        return Err(IndexError::StoreWrite(StoreError::DimensionMismatch {
                            expected: dimension,
                            actual: bad.len(),
                        }));
                    }
                    // Ledger first: a crash before the rebuild finishes must not
                    // leave entries pointing at dropped chunks.
                    self.ledger.clear()?;
                    db.drop_collection(&self.collection)?;
                    db.create_collection(&self.collection, dimension)?;
                }
                ReindexStrategy::Incremental => {
                    db.ensure_collection(&self.collection, dimension)?;
                }
            }
            db.replace_chunks(&self.collection, &stale, &records)
                .map_err(IndexError::StoreWrite)?
        };
        debug!("Deleted {} stale chunks", replaced.removed);

        let delete_failures: HashMap<String, String> = replaced
            .failed
            .into_iter()
            .map(|(path, source)| {
                let e = IndexError::StoreDelete {
                    path: path.clone(),
                    source,
                };
                warn!("{e}");
                (path, e.to_string())
            })
            .collect();
        let removed: Vec<String> = gone
            .into_iter()
            .filter(|p| !delete_failures.contains_key(p))
            .collect();

        let recorded: Vec<FileFingerprint> = report
            .files
            .iter()
            .filter(|f| !delete_failures.contains_key(&f.fingerprint.path))
            .map(|f| f.fingerprint.clone())
            .collect();
        self.ledger.record(&recorded, &removed)?;

        let chunks_written = replaced.ids.len();
        let summary = build_summary(strategy, report, removed, &delete_failures, chunks_written);
        info!(
            "{}: {} files, {} chunks, {} removed, {} skipped",
            summary.message(),
            summary.processed_files(),
            summary.chunks_written,
            summary.removed.len(),
            summary.skipped().count()
        );
        Ok(IndexOutcome::Completed(summary))
    }

    /// Chunk `paths` and embed the chunks on the blocking pool; ONNX inference
    /// must not stall the runtime threads.
    async fn chunk_and_embed(&self, paths: Vec<String>) -> Result<(ChunkingReport, Vec<Vec<f32>>)> {
        let splitter = self.splitter.clone();
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || -> Result<(ChunkingReport, Vec<Vec<f32>>)> {
            let report = splitter.chunk_documents(&paths);
            let vectors = embed_chunks(embedder.as_ref(), &report)?;
            Ok((report, vectors))
        })
        .await
        .map_err(|e| EmbedderError::InferenceFailed(format!("embedding task failed: {e}")))?
    }
}

/// Embed every chunk of the batch in a single call.
fn embed_chunks(embedder: &dyn Embedder, report: &ChunkingReport) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<&str> = report.chunks().map(|c| c.text.as_str()).collect();
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = embedder.embed_batch(&texts)?;
    if vectors.len() != texts.len() {
        return Err(EmbedderError::InferenceFailed(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        ))
        .into());
    }
    Ok(vectors)
}

fn resolve_directory(directory: &Path) -> Result<PathBuf> {
    if !directory.is_dir() {
        return Err(IndexError::DirectoryNotFound(
            directory.display().to_string(),
        ));
    }
    canonical_path(directory)
        .map(PathBuf::from)
        .map_err(|_| IndexError::DirectoryNotFound(directory.display().to_string()))
}

fn build_summary(
    strategy: ReindexStrategy,
    report: ChunkingReport,
    removed: Vec<String>,
    delete_failures: &HashMap<String, String>,
    chunks_written: usize,
) -> IndexSummary {
    let mut files: Vec<FileOutcome> = report
        .files
        .into_iter()
        .map(|f| {
            let chunks = f.chunks.len();
            let status = match delete_failures.get(&f.fingerprint.path) {
                Some(reason) => FileStatus::Partial {
                    chunks,
                    reason: reason.clone(),
                },
                None => FileStatus::Indexed { chunks },
            };
            FileOutcome {
                filename: file_name(&f.fingerprint.path).to_string(),
                path: f.fingerprint.path,
                status,
            }
        })
        .collect();

    files.extend(report.skipped.into_iter().map(|(path, err)| FileOutcome {
        filename: file_name(&path).to_string(),
        status: FileStatus::Skipped {
            reason: err.to_string(),
        },
        path,
    }));
    files.sort_by(|a, b| a.path.cmp(&b.path));

    IndexSummary {
        strategy,
        files,
        removed,
        chunks_written,
    }
}
