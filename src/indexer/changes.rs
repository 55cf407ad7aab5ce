//! Decides which Markdown files need (re)indexing.
use crate::error::Result;
use crate::indexer::ledger::{FingerprintStore, fingerprint};
use crate::indexer::paths::{canonical_path, in_scope};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

/// Canonical paths of all Markdown files under `directory`, sorted.
///
/// Hidden entries are skipped and `.gitignore` rules are honoured.
/// Subdirectories are only visited when `recursive` is set.
pub fn list_markdown_files(directory: &Path, recursive: bool) -> Vec<String> {
    let walker = WalkBuilder::new(directory)
        .hidden(true)
        .require_git(false)
        .max_depth(if recursive { None } else { Some(1) })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", directory.display());
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) || !is_markdown(entry.path()) {
            continue;
        }
        match canonical_path(entry.path()) {
            Ok(path) => files.push(path),
            Err(e) => warn!("Skipping {}: {e}", entry.path().display()),
        }
    }

    files.sort();
    files.dedup();
    files
}

/// Detects new and modified files against the fingerprint ledger.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: FingerprintStore,
}

impl ChangeDetector {
    pub fn new(store: FingerprintStore) -> Self {
        Self { store }
    }

    /// Markdown files under `directory` that are new or differ from their
    /// ledger entry by hash or mtime. Files that cannot be fingerprinted are
    /// left out. Sorted.
    pub fn changed_files(&self, directory: &Path, recursive: bool) -> Result<Vec<String>> {
        let ledger = self.store.load()?;

        let mut changed = Vec::new();
        for path in list_markdown_files(directory, recursive) {
            let current = match fingerprint(Path::new(&path)) {
                Ok(fp) => fp,
                Err(e) => {
                    debug!("Not considering {path}: {e}");
                    continue;
                }
            };
            if ledger.is_changed(&current) {
                debug!("Changed: {path}");
                changed.push(path);
            }
        }
        Ok(changed)
    }

    /// Ledger entries in scope of `directory` that the listing no longer
    /// yields: deleted, hidden, or ignored since they were indexed. Sorted.
    pub fn removed_files(&self, directory: &Path, recursive: bool) -> Result<Vec<String>> {
        let ledger = self.store.load()?;
        let dir = canonical_path(directory).map_err(|source| {
            crate::error::IndexError::FileUnreadable {
                path: directory.display().to_string(),
                source,
            }
        })?;

        let listed: BTreeSet<String> = list_markdown_files(directory, recursive)
            .into_iter()
            .collect();

        Ok(ledger
            .paths()
            .filter(|path| in_scope(path, &dir, recursive))
            .filter(|path| !listed.contains(*path))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn setup() -> (tempfile::TempDir, ChangeDetector) {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(dir.path().join(".data/index_tracking.json"));
        (dir, ChangeDetector::new(store))
    }

    fn key(path: &Path) -> String {
        canonical_path(path).unwrap()
    }

    #[test]
    fn test_list_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("a.MD"), "a").unwrap();
        fs::write(dir.path().join("notes.txt"), "t").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.md"), "c").unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join(".hidden/d.md"), "d").unwrap();

        let flat = list_markdown_files(dir.path(), false);
        assert_eq!(flat, vec![key(&dir.path().join("a.MD")), key(&dir.path().join("b.md"))]);

        let deep = list_markdown_files(dir.path(), true);
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&key(&dir.path().join("sub/c.md"))));
        assert!(deep.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_new_files_are_changed() {
        let (dir, detector) = setup();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();

        let changed = detector.changed_files(dir.path(), false).unwrap();
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn test_unchanged_after_commit() {
        let (dir, detector) = setup();
        let a = dir.path().join("a.md");
        fs::write(&a, "a").unwrap();

        detector.store.commit(&[key(&a)]).unwrap();
        assert!(detector.changed_files(dir.path(), false).unwrap().is_empty());
    }

    #[test]
    fn test_content_change_detected() {
        let (dir, detector) = setup();
        let a = dir.path().join("a.md");
        fs::write(&a, "first").unwrap();
        detector.store.commit(&[key(&a)]).unwrap();

        fs::write(&a, "second").unwrap();
        assert_eq!(
            detector.changed_files(dir.path(), false).unwrap(),
            vec![key(&a)]
        );
    }

    #[test]
    fn test_mtime_drift_detected() {
        let (dir, detector) = setup();
        let a = dir.path().join("a.md");
        fs::write(&a, "same").unwrap();
        detector.store.commit(&[key(&a)]).unwrap();

        let file = fs::File::options().write(true).open(&a).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        drop(file);

        assert_eq!(
            detector.changed_files(dir.path(), false).unwrap(),
            vec![key(&a)]
        );
    }

    #[test]
    fn test_newly_ignored_file_is_removed() {
        let (dir, detector) = setup();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        detector.store.commit(&[key(&a), key(&b)]).unwrap();
        assert!(detector.removed_files(dir.path(), false).unwrap().is_empty());

        fs::write(dir.path().join(".gitignore"), "b.md\n").unwrap();
        assert_eq!(
            list_markdown_files(dir.path(), false),
            vec![key(&a)]
        );
        assert_eq!(
            detector.removed_files(dir.path(), false).unwrap(),
            vec![key(&b)]
        );
    }

    #[test]
    fn test_removed_files() {
        let (dir, detector) = setup();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let c = dir.path().join("sub/c.md");
        for f in [&a, &b, &c] {
            fs::write(f, "x").unwrap();
        }
        detector.store.commit(&[key(&a), key(&b), key(&c)]).unwrap();
        let (b_key, c_key) = (key(&b), key(&c));

        fs::remove_file(&b).unwrap();
        fs::remove_file(&c).unwrap();

        assert_eq!(detector.removed_files(dir.path(), false).unwrap(), vec![b_key.clone()]);
        assert_eq!(
            detector.removed_files(dir.path(), true).unwrap(),
            vec![b_key, c_key]
        );
    }
}
