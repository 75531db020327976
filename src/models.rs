//! Core data models used throughout the vectorizer.
//!
//! These types represent jobs, their progress, and the repository, file,
//! and chunk rows that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a vectorization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of the ingestion pipeline a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    CloningRepository,
    DiscoveringFiles,
    ProcessingFiles,
    GeneratingEmbeddings,
    SavingChunks,
    Completed,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::CloningRepository => "cloning_repository",
            PipelineStep::DiscoveringFiles => "discovering_files",
            PipelineStep::ProcessingFiles => "processing_files",
            PipelineStep::GeneratingEmbeddings => "generating_embeddings",
            PipelineStep::SavingChunks => "saving_chunks",
            PipelineStep::Completed => "completed",
        }
    }
}

/// Observable progress counters for a job.
///
/// Counters only ever grow within a job, and
/// `files_processed <= files_discovered`,
/// `chunks_with_embeddings <= chunks_created`,
/// `chunks_saved <= chunks_with_embeddings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub step: Option<PipelineStep>,
    pub files_discovered: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub chunks_created: u64,
    pub chunks_with_embeddings: u64,
    pub chunks_skipped: u64,
    pub chunks_saved: u64,
    pub current_file: Option<String>,
}

/// A tracked vectorization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub username: String,
    pub repo_name: String,
    pub repo_url: String,
    pub status: JobStatus,
    pub progress: ProgressSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Status of a persisted repository row. Mirrors the owning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Processing,
    Completed,
    Failed,
}

impl RepositoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryStatus::Processing => "processing",
            RepositoryStatus::Completed => "completed",
            RepositoryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RepositoryStatus::Completed,
            "failed" => RepositoryStatus::Failed,
            _ => RepositoryStatus::Processing,
        }
    }
}

/// Persisted repository row, one per namespace.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub local_clone_path: Option<String>,
    pub status: RepositoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::store::TenantStore::upsert_repository`].
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub name: String,
    pub source_url: String,
    pub local_clone_path: Option<String>,
}

/// Persisted file row.
#[derive(Debug, Clone, Serialize)]
pub struct CodeFile {
    pub id: String,
    pub repository_id: String,
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

/// Input for [`crate::store::TenantStore::save_file`].
#[derive(Debug, Clone)]
pub struct NewCodeFile {
    pub repository_id: String,
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

/// Persisted chunk row with its embedding.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub id: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

/// A chunk ready to be written together with its file.
#[derive(Debug, Clone)]
pub struct NewCodeChunk {
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

/// Listing entry for a tenant's repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySummary {
    pub repo_name: String,
    pub repo_url: String,
    pub status: RepositoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_count: u64,
    pub chunk_count: u64,
    pub namespace: String,
}

/// File count and size for one extension within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    pub extension: String,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

/// Content breakdown of one indexed repository.
///
/// `extensions` is ordered by file count, largest first, then by extension.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStats {
    pub repo_name: String,
    pub repo_url: String,
    pub status: RepositoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_count: u64,
    pub chunk_count: u64,
    pub total_size_bytes: u64,
    pub extensions: Vec<ExtensionStats>,
    pub namespace: String,
}

/// A stored chunk whose file path matched a path search.
#[derive(Debug, Clone, Serialize)]
pub struct PathMatch {
    pub repo_name: String,
    pub file_path: String,
    pub file_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub content: String,
}

/// A ranked chunk returned by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub repo_name: String,
    pub file_path: String,
    pub file_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub content: String,
    pub similarity: f32,
}
