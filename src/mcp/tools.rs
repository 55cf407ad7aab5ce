/// MCP tool handlers.
///
/// 1. index_documents  – incrementally (or fully) index a folder of Markdown files
/// 2. search_documents – semantic search over the indexed chunks
use crate::error::IndexError;
use crate::indexer::core::{FileStatus, IndexOutcome, IndexSummary, ReindexStrategy};
use crate::indexer::paths::file_name;
use crate::mcp::server::McpContext;
use crate::query::format_results;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

pub const UP_TO_DATE_MESSAGE: &str = "Already up to date, no changes detected";

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct IndexDocumentsParams {
    /// Absolute path of the caller's working directory
    current_working_directory: String,
    /// Subdirectory to index, relative to the working directory (default: the working directory itself)
    directory: Option<String>,
    /// Also index Markdown files in subdirectories (default: false)
    #[serde(default)]
    recursive: bool,
    /// Drop the existing index and rebuild it from scratch (default: false)
    #[serde(default)]
    force_reindex: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchDocumentsParams {
    /// Search query (natural language)
    query: String,
    /// Number of chunks to return (default from config: 5)
    k: Option<usize>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Request errors go back to the client as error results; faults in the
/// server become MCP errors.
fn failure(e: IndexError) -> Result<CallToolResult, McpError> {
    if e.is_reportable() {
        error_result(&e.to_string())
    } else {
        tracing::error!("Tool call failed: {e}");
        Err(McpError::internal_error(e.to_string(), None))
    }
}

fn resolve_target(cwd: &str, directory: Option<&str>) -> PathBuf {
    let base = Path::new(cwd);
    match directory.map(str::trim).filter(|d| !d.is_empty()) {
        Some(sub) => base.join(sub),
        None => base.to_path_buf(),
    }
}

/// JSON report of an indexing run, as returned by `index_documents`.
pub fn outcome_json(outcome: &IndexOutcome) -> serde_json::Value {
    match outcome {
        IndexOutcome::Completed(summary) => summary_json(summary),
        IndexOutcome::UpToDate => json!({
            "message": UP_TO_DATE_MESSAGE,
            "processed_files": 0,
            "total_chunks": 0,
            "files": [],
            "removed_files": [],
            "skipped_files": [],
            "partial_files": [],
        }),
    }
}

fn summary_json(summary: &IndexSummary) -> serde_json::Value {
    let with_reason = |status: &FileStatus| match status {
        FileStatus::Skipped { reason } | FileStatus::Partial { reason, .. } => reason.clone(),
        FileStatus::Indexed { .. } => String::new(),
    };

    json!({
        "message": summary.message(),
        "processed_files": summary.processed_files(),
        "total_chunks": summary.chunks_written,
        "files": summary.processed_filenames(),
        "removed_files": summary
            .removed
            .iter()
            .map(|p| file_name(p))
            .collect::<Vec<_>>(),
        "skipped_files": summary
            .skipped()
            .map(|f| json!({ "file": f.filename, "reason": with_reason(&f.status) }))
            .collect::<Vec<_>>(),
        "partial_files": summary
            .partial()
            .map(|f| json!({ "file": f.filename, "reason": with_reason(&f.status) }))
            .collect::<Vec<_>>(),
    })
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: index_documents ─────────────────────────────────────

    #[tool(
        description = "Index the Markdown files of a directory for semantic search. Only new or modified files are processed unless force_reindex is set; chunks of deleted files are removed."
    )]
    async fn index_documents(
        &self,
        params: Parameters<IndexDocumentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.current_working_directory.trim().is_empty() {
            return error_result("current_working_directory is required");
        }

        let target = resolve_target(&p.current_working_directory, p.directory.as_deref());
        let strategy = ReindexStrategy::from_force(p.force_reindex);

        match self.ctx.writer.run(&target, p.recursive, strategy).await {
            Ok(outcome) => json_result(outcome_json(&outcome)),
            Err(e) => failure(e),
        }
    }

    // ── Tool 2: search_documents ────────────────────────────────────

    #[tool(
        description = "Semantic search over indexed Markdown documents. Returns the closest chunks, nearest first."
    )]
    async fn search_documents(
        &self,
        params: Parameters<SearchDocumentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let k = p.k.unwrap_or(self.ctx.config.search_top_k);

        match self.ctx.query.search(&p.query, k).await {
            Ok(results) => Ok(CallToolResult::success(vec![Content::text(
                format_results(&results),
            )])),
            Err(e) => failure(e),
        }
    }
}
