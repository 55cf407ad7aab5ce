//! # mdrag - Local Markdown RAG MCP Server
//!
//! Indexes a folder of Markdown files into a local vector store and serves
//! semantic search to AI assistants via the Model Context Protocol (MCP).
//! Re-indexing is incremental: a fingerprint ledger records which version
//! of each file is in the store, so only new, modified and deleted files
//! cost work.
//!
//! ## Architecture
//!
//! - **[`config`]** - Configuration loading and validation
//! - **[`db`]** - SQLite + sqlite-vec vector store (collections, chunks, search)
//! - **[`embedder`]** - Text embedding via ONNX Runtime, plus a deterministic mock
//! - **[`indexer`]** - Change detection, fingerprint ledger, chunking, index writer
//! - **[`query`]** - Query execution and result formatting
//! - **[`mcp`]** - MCP server with the `index_documents` / `search_documents` tools

pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod mcp;
pub mod query;
