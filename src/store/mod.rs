//! Tenant-scoped storage.
//!
//! Every `(username, repo_name)` pair owns an isolated [`Namespace`]: its own
//! repository, file and chunk tables. Namespace ids are derived
//! deterministically from the pair, so the same key always addresses the same
//! storage and no catalog is needed to find a user's namespaces.
//!
//! Two backends implement [`TenantStore`]:
//! - [`SqliteStore`]: namespaced table sets inside one SQLite database.
//! - [`MemoryStore`]: `HashMap`s behind a lock, for tests and ephemeral runs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::DbConfig;
use crate::error::Result;
use crate::models::{
    CodeFile, ExtensionStats, NewCodeChunk, NewCodeFile, NewRepository, PathMatch, Repository,
    RepositoryStats, RepositoryStatus, RepositorySummary, SearchResult,
};

/// Hex characters of each SHA-256 digest used in a namespace id.
const HASH_PREFIX_LEN: usize = 12;

/// Canonical form of a username or repository name. Every path into the
/// store goes through this, so `"alice "` and `"alice"` are one tenant.
pub fn normalize_name(value: &str) -> &str {
    value.trim()
}

/// Identity of a tenant namespace. Both parts are stored normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NamespaceKey {
    pub username: String,
    pub repo_name: String,
}

impl NamespaceKey {
    pub fn new(username: impl Into<String>, repo_name: impl Into<String>) -> Self {
        let username: String = username.into();
        let repo_name: String = repo_name.into();
        Self {
            username: normalize_name(&username).to_string(),
            repo_name: normalize_name(&repo_name).to_string(),
        }
    }

    /// `ns_<sha256(username)[..12]>_<sha256(repo_name)[..12]>`.
    ///
    /// Only lowercase hex and `_`, so the id is safe to splice into table
    /// names.
    pub fn namespace_id(&self) -> String {
        format!(
            "{}{}",
            user_prefix(&self.username),
            short_hash(&self.repo_name)
        )
    }
}

/// Prefix shared by every namespace id of `username`.
pub fn user_prefix(username: &str) -> String {
    format!("ns_{}_", short_hash(normalize_name(username)))
}

fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex = String::with_capacity(HASH_PREFIX_LEN);
    for byte in digest.iter().take(HASH_PREFIX_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// A provisioned namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub key: NamespaceKey,
    pub id: String,
}

impl Namespace {
    pub fn new(key: NamespaceKey) -> Self {
        let id = key.namespace_id();
        Self { key, id }
    }
}

/// Matches from one namespace: the best `limit` results plus how many rows
/// cleared the threshold in total.
#[derive(Debug, Clone, Default)]
pub struct ScoredMatches {
    pub total: usize,
    pub results: Vec<SearchResult>,
}

/// Storage operations the pipeline, search engine and service need.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_namespace`](TenantStore::ensure_namespace) | Provision a namespace (idempotent) |
/// | [`namespace_exists`](TenantStore::namespace_exists) | Check for a namespace |
/// | [`upsert_repository`](TenantStore::upsert_repository) | Create or reset the repository row |
/// | [`set_repository_status`](TenantStore::set_repository_status) | Record job outcome on the row |
/// | [`save_file`](TenantStore::save_file) | Atomically write a file and its chunks |
/// | [`list_namespaces`](TenantStore::list_namespaces) | A user's namespaces |
/// | [`list_repositories`](TenantStore::list_repositories) | A user's repositories with counts |
/// | [`delete_namespace`](TenantStore::delete_namespace) | Drop a namespace and everything in it |
/// | [`repository_stats`](TenantStore::repository_stats) | Per-extension file counts and sizes |
/// | [`search`](TenantStore::search) | Cosine similarity search in one namespace |
/// | [`find_by_path`](TenantStore::find_by_path) | Chunks of files whose path contains a pattern |
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn ensure_namespace(&self, key: &NamespaceKey) -> Result<Namespace>;

    async fn namespace_exists(&self, key: &NamespaceKey) -> Result<bool>;

    /// Each namespace holds one repository row; a second call resets it to
    /// `processing` and refreshes its source fields.
    async fn upsert_repository(&self, ns: &Namespace, repo: NewRepository) -> Result<Repository>;

    async fn set_repository_status(
        &self,
        ns: &Namespace,
        repository_id: &str,
        status: RepositoryStatus,
    ) -> Result<()>;

    /// Write the file row and all of its chunks, or nothing.
    async fn save_file(
        &self,
        ns: &Namespace,
        file: NewCodeFile,
        chunks: &[NewCodeChunk],
    ) -> Result<CodeFile>;

    /// Namespaces of `username` that hold a repository row, ordered by repo name.
    async fn list_namespaces(&self, username: &str) -> Result<Vec<Namespace>>;

    async fn list_repositories(&self, username: &str) -> Result<Vec<RepositorySummary>>;

    /// Remove the namespace entirely. `NotFound` if it does not exist.
    async fn delete_namespace(&self, key: &NamespaceKey) -> Result<()>;

    /// `NotFound` if the namespace holds no repository.
    async fn repository_stats(&self, key: &NamespaceKey) -> Result<RepositoryStats>;

    /// Chunks with `similarity >= threshold`, best first, at most `limit`.
    async fn search(
        &self,
        ns: &Namespace,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<ScoredMatches>;

    /// Chunks of files whose path contains `pattern`, ignoring case, ordered
    /// by path then start line, at most `limit`.
    async fn find_by_path(
        &self,
        ns: &Namespace,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<PathMatch>>;
}

/// Sort best first; ties broken by file path, start line, then repository.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
            .then_with(|| a.repo_name.cmp(&b.repo_name))
    });
}

/// Keep matches at or above `threshold`, rank them and truncate to `limit`.
pub(crate) fn select_matches(
    mut candidates: Vec<SearchResult>,
    limit: usize,
    threshold: f32,
) -> ScoredMatches {
    candidates.retain(|r| r.similarity >= threshold);
    let total = candidates.len();
    rank(&mut candidates);
    candidates.truncate(limit);
    ScoredMatches {
        total,
        results: candidates,
    }
}

/// Order path matches by file path, then start line.
pub(crate) fn sort_path_matches(matches: &mut [PathMatch]) {
    matches.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
}

/// Largest extension groups first; ties by extension.
pub(crate) fn sort_extensions(extensions: &mut [ExtensionStats]) {
    extensions.sort_by(|a, b| {
        b.file_count
            .cmp(&a.file_count)
            .then_with(|| a.extension.cmp(&b.extension))
    });
}

/// Open the backend named by `db.backend`.
pub async fn open_store(config: &DbConfig) -> anyhow::Result<Arc<dyn TenantStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => {
            let pool = crate::db::connect(config).await?;
            Ok(Arc::new(SqliteStore::new(pool)))
        }
        other => anyhow::bail!("Unknown db backend: {}", other),
    }
}
