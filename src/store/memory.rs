//! In-memory [`TenantStore`] for tests and ephemeral runs.
//!
//! Namespaces live in a `HashMap` behind a `parking_lot::RwLock`. Every
//! operation takes the lock once, so a file and its chunks become visible
//! together. Vector search is brute-force cosine similarity.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::embedding::cosine_similarity;
use crate::error::{Result, VectorizeError};
use crate::models::{
    CodeChunk, CodeFile, ExtensionStats, NewCodeChunk, NewCodeFile, NewRepository, PathMatch,
    Repository, RepositoryStats, RepositoryStatus, RepositorySummary, SearchResult,
};

use super::{
    normalize_name, select_matches, sort_extensions, sort_path_matches, user_prefix, Namespace,
    NamespaceKey, ScoredMatches, TenantStore,
};

struct NamespaceData {
    key: NamespaceKey,
    repository: Option<Repository>,
    files: Vec<CodeFile>,
    chunks: Vec<CodeChunk>,
}

impl NamespaceData {
    fn new(key: NamespaceKey) -> Self {
        Self {
            key,
            repository: None,
            files: Vec::new(),
            chunks: Vec::new(),
        }
    }
}

pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, NamespaceData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(ns: &Namespace) -> VectorizeError {
    VectorizeError::NotFound(format!("namespace {}", ns.id))
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn ensure_namespace(&self, key: &NamespaceKey) -> Result<Namespace> {
        let ns = Namespace::new(key.clone());
        self.namespaces
            .write()
            .entry(ns.id.clone())
            .or_insert_with(|| NamespaceData::new(key.clone()));
        Ok(ns)
    }

    async fn namespace_exists(&self, key: &NamespaceKey) -> Result<bool> {
        Ok(self.namespaces.read().contains_key(&key.namespace_id()))
    }

    async fn upsert_repository(&self, ns: &Namespace, repo: NewRepository) -> Result<Repository> {
        let mut namespaces = self.namespaces.write();
        let data = namespaces.get_mut(&ns.id).ok_or_else(|| missing(ns))?;
        let now = Utc::now();
        let row = match data.repository.take() {
            Some(existing) => Repository {
                source_url: repo.source_url,
                local_clone_path: repo.local_clone_path,
                status: RepositoryStatus::Processing,
                updated_at: now,
                ..existing
            },
            None => Repository {
                id: uuid::Uuid::new_v4().to_string(),
                name: repo.name,
                source_url: repo.source_url,
                local_clone_path: repo.local_clone_path,
                status: RepositoryStatus::Processing,
                created_at: now,
                updated_at: now,
            },
        };
        data.repository = Some(row.clone());
        Ok(row)
    }

    async fn set_repository_status(
        &self,
        ns: &Namespace,
        repository_id: &str,
        status: RepositoryStatus,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let data = namespaces.get_mut(&ns.id).ok_or_else(|| missing(ns))?;
        match data.repository.as_mut() {
            Some(repo) if repo.id == repository_id => {
                repo.status = status;
                repo.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(VectorizeError::NotFound(format!(
                "repository {}",
                repository_id
            ))),
        }
    }

    async fn save_file(
        &self,
        ns: &Namespace,
        file: NewCodeFile,
        chunks: &[NewCodeChunk],
    ) -> Result<CodeFile> {
        let mut namespaces = self.namespaces.write();
        let data = namespaces.get_mut(&ns.id).ok_or_else(|| missing(ns))?;
        if data.repository.as_ref().map(|r| r.id.as_str()) != Some(file.repository_id.as_str()) {
            return Err(VectorizeError::Storage(format!(
                "repository {} does not exist in {}",
                file.repository_id, ns.id
            )));
        }

        let row = CodeFile {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: file.repository_id,
            path: file.path,
            name: file.name,
            extension: file.extension,
            size_bytes: file.size_bytes,
            content_hash: file.content_hash,
        };
        data.chunks.extend(chunks.iter().map(|c| CodeChunk {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: row.id.clone(),
            chunk_index: c.chunk_index,
            content: c.content.clone(),
            start_line: c.start_line,
            end_line: c.end_line,
            token_count: c.token_count,
            embedding: c.embedding.clone(),
        }));
        data.files.push(row.clone());
        Ok(row)
    }

    async fn list_namespaces(&self, username: &str) -> Result<Vec<Namespace>> {
        let username = normalize_name(username);
        let prefix = user_prefix(username);
        let namespaces = self.namespaces.read();
        let mut found: Vec<Namespace> = namespaces
            .iter()
            .filter(|(id, data)| {
                id.starts_with(&prefix)
                    && data.key.username == username
                    && data.repository.is_some()
            })
            .map(|(id, data)| Namespace {
                key: data.key.clone(),
                id: id.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.key.repo_name.cmp(&b.key.repo_name));
        Ok(found)
    }

    async fn list_repositories(&self, username: &str) -> Result<Vec<RepositorySummary>> {
        let listed = self.list_namespaces(username).await?;
        let namespaces = self.namespaces.read();
        let mut summaries = Vec::with_capacity(listed.len());
        for ns in listed {
            let Some(data) = namespaces.get(&ns.id) else {
                continue;
            };
            let Some(repo) = data.repository.as_ref() else {
                continue;
            };
            summaries.push(RepositorySummary {
                repo_name: repo.name.clone(),
                repo_url: repo.source_url.clone(),
                status: repo.status,
                created_at: repo.created_at,
                updated_at: repo.updated_at,
                file_count: data.files.len() as u64,
                chunk_count: data.chunks.len() as u64,
                namespace: ns.id,
            });
        }
        Ok(summaries)
    }

    async fn delete_namespace(&self, key: &NamespaceKey) -> Result<()> {
        match self.namespaces.write().remove(&key.namespace_id()) {
            Some(_) => Ok(()),
            None => Err(VectorizeError::NotFound(format!(
                "repository {} for user {}",
                key.repo_name, key.username
            ))),
        }
    }

    async fn repository_stats(&self, key: &NamespaceKey) -> Result<RepositoryStats> {
        let not_found = || {
            VectorizeError::NotFound(format!(
                "repository {} for user {}",
                key.repo_name, key.username
            ))
        };
        let ns_id = key.namespace_id();
        let namespaces = self.namespaces.read();
        let data = namespaces.get(&ns_id).ok_or_else(not_found)?;
        let repo = data.repository.as_ref().ok_or_else(not_found)?;

        let mut groups: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for file in &data.files {
            let entry = groups.entry(file.extension.as_str()).or_default();
            entry.0 += 1;
            entry.1 += file.size_bytes;
        }
        let mut extensions: Vec<ExtensionStats> = groups
            .into_iter()
            .map(|(extension, (file_count, total_size_bytes))| ExtensionStats {
                extension: extension.to_string(),
                file_count,
                total_size_bytes,
            })
            .collect();
        sort_extensions(&mut extensions);

        Ok(RepositoryStats {
            repo_name: repo.name.clone(),
            repo_url: repo.source_url.clone(),
            status: repo.status,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
            file_count: data.files.len() as u64,
            chunk_count: data.chunks.len() as u64,
            total_size_bytes: data.files.iter().map(|f| f.size_bytes).sum(),
            extensions,
            namespace: ns_id,
        })
    }

    async fn find_by_path(
        &self,
        ns: &Namespace,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<PathMatch>> {
        let namespaces = self.namespaces.read();
        let data = namespaces.get(&ns.id).ok_or_else(|| missing(ns))?;
        let repo_name = data
            .repository
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| data.key.repo_name.clone());
        let needle = pattern.to_lowercase();
        let files: HashMap<&str, &CodeFile> = data
            .files
            .iter()
            .filter(|f| f.path.to_lowercase().contains(&needle))
            .map(|f| (f.id.as_str(), f))
            .collect();

        let mut matches: Vec<PathMatch> = data
            .chunks
            .iter()
            .filter_map(|chunk| {
                let file = files.get(chunk.file_id.as_str())?;
                Some(PathMatch {
                    repo_name: repo_name.clone(),
                    file_path: file.path.clone(),
                    file_name: file.name.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    token_count: chunk.token_count,
                    content: chunk.content.clone(),
                })
            })
            .collect();
        sort_path_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn search(
        &self,
        ns: &Namespace,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<ScoredMatches> {
        let namespaces = self.namespaces.read();
        let data = namespaces.get(&ns.id).ok_or_else(|| missing(ns))?;
        let repo_name = data
            .repository
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| data.key.repo_name.clone());
        let files: HashMap<&str, &CodeFile> =
            data.files.iter().map(|f| (f.id.as_str(), f)).collect();

        let candidates = data
            .chunks
            .iter()
            .filter_map(|chunk| {
                let file = files.get(chunk.file_id.as_str())?;
                Some(SearchResult {
                    repo_name: repo_name.clone(),
                    file_path: file.path.clone(),
                    file_name: file.name.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    token_count: chunk.token_count,
                    content: chunk.content.clone(),
                    similarity: cosine_similarity(query, &chunk.embedding),
                })
            })
            .collect();

        Ok(select_matches(candidates, limit, threshold))
    }
}
