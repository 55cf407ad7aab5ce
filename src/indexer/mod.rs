//! Incremental Markdown indexing: enumeration, fingerprints, chunking and
//! the writer that keeps the vector store in step with the files.
pub mod changes;
pub mod core;
pub mod ledger;
pub mod markdown;
pub mod paths;
