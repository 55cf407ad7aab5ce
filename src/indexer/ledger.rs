//! Persisted fingerprint ledger.
//!
//! Maps each indexed file's canonical path to the SHA-256 of its bytes and
//! its modification time. On disk it is a JSON object
//! `{"<path>": ["<sha256 hex>", <mtime seconds>]}`, always rewritten whole.
use crate::error::{IndexError, Result};
use crate::indexer::paths::canonical_path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Content hash and mtime of one version of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFingerprint {
    pub path: String,
    pub content_hash: String,
    pub mtime: f64,
}

/// Stored form of a fingerprint: `[content_hash, mtime]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry(String, f64);

/// In-memory view of the ledger, keyed by canonical path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintLedger {
    entries: BTreeMap<String, Entry>,
}

impl FingerprintLedger {
    pub fn get(&self, path: &str) -> Option<FileFingerprint> {
        self.entries.get(path).map(|Entry(hash, mtime)| FileFingerprint {
            path: path.to_string(),
            content_hash: hash.clone(),
            mtime: *mtime,
        })
    }

    pub fn insert(&mut self, fingerprint: FileFingerprint) {
        self.entries.insert(
            fingerprint.path,
            Entry(fingerprint.content_hash, fingerprint.mtime),
        );
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Known paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `current` describes a different version than the recorded one.
    ///
    /// Unknown paths count as changed. An mtime drift with an identical hash
    /// still counts, so touched files are re-verified.
    pub fn is_changed(&self, current: &FileFingerprint) -> bool {
        match self.entries.get(&current.path) {
            None => true,
            Some(Entry(hash, mtime)) => *hash != current.content_hash || *mtime != current.mtime,
        }
    }
}

/// Reads and writes the ledger file.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted ledger. A missing file is an empty ledger.
    pub fn load(&self) -> Result<FingerprintLedger> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FingerprintLedger::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&data).map_err(|source| IndexError::LedgerFormat {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Overwrite the persisted ledger via a temporary file and rename.
    pub fn save(&self, ledger: &FingerprintLedger) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let bytes =
            serde_json::to_vec_pretty(ledger).map_err(|source| IndexError::LedgerFormat {
                path: self.path.display().to_string(),
                source,
            })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;

        debug!("Saved ledger with {} entries", ledger.len());
        Ok(())
    }

    /// Recompute fingerprints for `paths` and store them; paths that no longer
    /// exist lose their entry instead. Call only after their chunks are stored.
    pub fn commit(&self, paths: &[String]) -> Result<()> {
        let mut fingerprints = Vec::new();
        let mut removed = Vec::new();
        for path in paths {
            if Path::new(path).exists() {
                match fingerprint(Path::new(path)) {
                    Ok(fp) => fingerprints.push(fp),
                    Err(_) => removed.push(path.clone()),
                }
            } else {
                removed.push(path.clone());
            }
        }
        self.record(&fingerprints, &removed)
    }

    /// Store already-computed fingerprints and drop `removed` paths in one
    /// load-modify-save cycle.
    pub fn record(&self, fingerprints: &[FileFingerprint], removed: &[String]) -> Result<()> {
        if fingerprints.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let mut ledger = self.load()?;
        for fp in fingerprints {
            ledger.insert(fp.clone());
        }
        for path in removed {
            ledger.remove(path);
        }
        self.save(&ledger)
    }

    /// Forget every entry.
    pub fn clear(&self) -> Result<()> {
        self.save(&FingerprintLedger::default())
    }

    fn io_error(&self, source: std::io::Error) -> IndexError {
        IndexError::LedgerIo {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Compute the fingerprint of a file on disk.
pub fn fingerprint(path: &Path) -> Result<FileFingerprint> {
    fingerprint_with_bytes(path).map(|(fp, _)| fp)
}

/// Fingerprint a file and hand back the bytes that were hashed, so a caller
/// can index exactly the version the fingerprint describes.
///
/// The mtime is read before the content: a write racing with the read leaves
/// a stale mtime behind, which the next run detects as a change.
pub fn fingerprint_with_bytes(path: &Path) -> Result<(FileFingerprint, Vec<u8>)> {
    let canonical = canonical_path(path).map_err(|source| unreadable(path, source))?;

    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| unreadable(path, source))?;
    let mtime = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    };

    let bytes = std::fs::read(path).map_err(|source| unreadable(path, source))?;
    let content_hash = hex::encode(Sha256::digest(&bytes));

    Ok((
        FileFingerprint {
            path: canonical,
            content_hash,
            mtime,
        },
        bytes,
    ))
}

fn unreadable(path: &Path, source: std::io::Error) -> IndexError {
    IndexError::FileUnreadable {
        path: path.display().to_string(),
        source,
    }
}
