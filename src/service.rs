//! The service facade: the operations exposed to clients.
//!
//! Vectorize, job status, similarity search, listing and deletion form the
//! core; repository stats and path search are read-only extras. Usernames
//! and repository names are normalized here before they reach the store.
//!
//! [`VectorizerService`] wires the store, fetcher, embedding adapter, job
//! registry, pipeline and search engine together. The HTTP server and the
//! CLI both call into it; neither talks to the components directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::discover::DiscoveryFilter;
use crate::embedding::{create_backend, EmbeddingAdapter};
use crate::error::{Result, VectorizeError};
use crate::fetch::{repo_name_from_url, GitFetcher, RepositoryFetcher};
use crate::jobs::JobRegistry;
use crate::models::{Job, JobStatus, RepositoryStats, RepositorySummary};
use crate::pipeline::{JobSpec, Pipeline};
use crate::search::{
    PathSearchRequest, PathSearchResponse, SearchEngine, SearchRequest, SearchResponse,
};
use crate::store::{normalize_name, open_store, NamespaceKey, TenantStore};

#[derive(Debug, Clone, Deserialize)]
pub struct VectorizeRequest {
    pub repo_url: String,
    pub username: String,
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

impl VectorizeRequest {
    pub fn new(repo_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            username: username.into(),
            repo_name: None,
            auth_token: None,
            chunk_size: None,
            chunk_overlap: None,
            max_file_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub struct VectorizerService {
    config: Config,
    store: Arc<dyn TenantStore>,
    jobs: Arc<JobRegistry>,
    pipeline: Arc<Pipeline>,
    search: SearchEngine,
}

impl VectorizerService {
    /// Assemble the service from explicit components.
    pub fn new(
        config: Config,
        store: Arc<dyn TenantStore>,
        fetcher: Arc<dyn RepositoryFetcher>,
        embedder: EmbeddingAdapter,
    ) -> Self {
        let jobs = Arc::new(JobRegistry::new());
        let pipeline = Arc::new(Pipeline {
            store: store.clone(),
            fetcher,
            embedder: embedder.clone(),
            jobs: jobs.clone(),
            file_concurrency: config.ingest.file_concurrency,
        });
        let search = SearchEngine::new(store.clone(), embedder, config.retrieval.clone());
        Self {
            config,
            store,
            jobs,
            pipeline,
            search,
        }
    }

    /// Assemble the service from configuration: store per `[db]`, embedding
    /// backend per `[embedding]`, git fetcher per `[git]`.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config.db).await?;
        let backend = create_backend(&config.embedding)?;
        let embedder = EmbeddingAdapter::from_config(backend, &config.embedding);
        let fetcher = Arc::new(GitFetcher::from_config(&config.git));
        Ok(Self::new(config, store, fetcher, embedder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate, register a job, and start it in the background.
    pub fn start_vectorization(&self, request: VectorizeRequest) -> Result<JobAccepted> {
        let spec = self.prepare(request)?;
        let job = self
            .jobs
            .create(&spec.key.username, &spec.key.repo_name, &spec.repo_url);
        let spec = JobSpec {
            job_id: job.id.clone(),
            ..spec
        };

        tracing::info!(
            job_id = %job.id,
            username = %job.username,
            repo = %job.repo_name,
            "vectorization job accepted"
        );
        self.pipeline.spawn(spec);

        Ok(JobAccepted {
            job_id: job.id,
            status: job.status,
            message: format!(
                "Vectorization of {} started for user {}",
                job.repo_name, job.username
            ),
            created_at: job.created_at,
        })
    }

    pub fn job_status(&self, job_id: &str) -> Result<Job> {
        self.jobs.get(job_id)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search.search(request).await
    }

    pub async fn search_by_path(
        &self,
        request: &PathSearchRequest,
    ) -> Result<PathSearchResponse> {
        self.search.search_by_path(request).await
    }

    pub async fn list_repositories(&self, username: &str) -> Result<Vec<RepositorySummary>> {
        let username = require_username(username)?;
        self.store.list_repositories(username).await
    }

    pub async fn repository_stats(
        &self,
        username: &str,
        repo_name: &str,
    ) -> Result<RepositoryStats> {
        let key = tenant_key(username, repo_name)?;
        self.store.repository_stats(&key).await
    }

    pub async fn delete_repository(&self, username: &str, repo_name: &str) -> Result<()> {
        let key = tenant_key(username, repo_name)?;
        self.store.delete_namespace(&key).await?;
        tracing::info!(username = %key.username, repo = %key.repo_name, "repository deleted");
        Ok(())
    }

    /// Check a request and resolve its defaults. The job id is filled in by
    /// the caller once the job exists.
    fn prepare(&self, request: VectorizeRequest) -> Result<JobSpec> {
        let username = require_username(&request.username)?;

        let repo_url = request.repo_url.trim().to_string();
        let parsed = url::Url::parse(&repo_url).map_err(|e| {
            VectorizeError::Validation(format!("invalid repo_url '{}': {}", repo_url, e))
        })?;
        if !self.config.git.allows_scheme(parsed.scheme()) {
            return Err(VectorizeError::Validation(format!(
                "unsupported repo_url scheme '{}'",
                parsed.scheme()
            )));
        }

        let repo_name = match request.repo_name.as_deref().map(normalize_name) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => repo_name_from_url(&repo_url).ok_or_else(|| {
                VectorizeError::Validation(format!(
                    "cannot derive a repository name from '{}'",
                    repo_url
                ))
            })?,
        };

        let chunker = Chunker::new(
            request
                .chunk_size
                .unwrap_or(self.config.chunking.max_tokens),
            request
                .chunk_overlap
                .unwrap_or(self.config.chunking.overlap_tokens),
        )?;

        if request.max_file_size == Some(0) {
            return Err(VectorizeError::Validation(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        let filter = DiscoveryFilter::from_config(&self.config.chunking, request.max_file_size)?;

        Ok(JobSpec {
            job_id: String::new(),
            key: NamespaceKey::new(username, repo_name),
            repo_url,
            auth_token: request.auth_token.filter(|t| !t.is_empty()),
            chunker,
            filter,
        })
    }
}

/// The normalized username, or a validation error if nothing is left.
fn require_username(username: &str) -> Result<&str> {
    let username = normalize_name(username);
    if username.is_empty() {
        return Err(VectorizeError::Validation(
            "username must not be empty".to_string(),
        ));
    }
    Ok(username)
}

fn tenant_key(username: &str, repo_name: &str) -> Result<NamespaceKey> {
    let username = require_username(username)?;
    let repo_name = normalize_name(repo_name);
    if repo_name.is_empty() {
        return Err(VectorizeError::Validation(
            "repo_name must not be empty".to_string(),
        ));
    }
    Ok(NamespaceKey::new(username, repo_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledBackend, RetryPolicy};
    use crate::fetch::{FetchRequest, FetchedRepository};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoFetch;

    #[async_trait]
    impl RepositoryFetcher for NoFetch {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedRepository> {
            Err(VectorizeError::RepositoryUnavailable(request.url.clone()))
        }
    }

    fn service() -> VectorizerService {
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        VectorizerService::new(
            Config::minimal(),
            Arc::new(MemoryStore::new()),
            Arc::new(NoFetch),
            EmbeddingAdapter::new(Arc::new(DisabledBackend), retry, 10, 100, 1),
        )
    }

    #[test]
    fn test_prepare_derives_repo_name() {
        let svc = service();
        let spec = svc
            .prepare(VectorizeRequest::new(
                "https://github.com/org/widgets.git",
                "alice",
            ))
            .unwrap();
        assert_eq!(spec.key, NamespaceKey::new("alice", "widgets"));
        assert_eq!(spec.chunker.max_tokens(), 1000);
        assert_eq!(spec.chunker.overlap_tokens(), 200);
    }

    #[test]
    fn test_prepare_explicit_name_wins() {
        let svc = service();
        let mut req = VectorizeRequest::new("https://github.com/org/widgets.git", "alice");
        req.repo_name = Some("custom".to_string());
        assert_eq!(svc.prepare(req).unwrap().key.repo_name, "custom");
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        let svc = service();

        let bad_url = VectorizeRequest::new("not a url", "alice");
        assert!(matches!(
            svc.prepare(bad_url),
            Err(VectorizeError::Validation(_))
        ));

        let bad_scheme = VectorizeRequest::new("ftp://example.com/repo.git", "alice");
        assert!(svc.prepare(bad_scheme).is_err());

        let ssh = VectorizeRequest::new("ssh://git@example.com/org/widgets.git", "alice");
        assert!(svc.prepare(ssh).is_err());

        let no_user = VectorizeRequest::new("https://github.com/org/widgets.git", " ");
        assert!(svc.prepare(no_user).is_err());

        let mut overlap = VectorizeRequest::new("https://github.com/org/widgets.git", "alice");
        overlap.chunk_size = Some(100);
        overlap.chunk_overlap = Some(100);
        assert!(svc.prepare(overlap).is_err());

        let mut zero = VectorizeRequest::new("https://github.com/org/widgets.git", "alice");
        zero.chunk_size = Some(0);
        assert!(svc.prepare(zero).is_err());
    }

    #[tokio::test]
    async fn test_local_urls_rejected_by_default() {
        let svc = service();
        let err = svc
            .start_vectorization(VectorizeRequest::new("file:///etc", "mallory"))
            .unwrap_err();
        assert!(matches!(err, VectorizeError::Validation(_)));
        assert!(err.to_string().contains("'file'"));
        assert!(svc.jobs.is_empty());
    }

    #[test]
    fn test_local_urls_allowed_when_configured() {
        let mut config = Config::minimal();
        config.git.allowed_schemes.push("file".to_string());
        let svc = VectorizerService::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoFetch),
            EmbeddingAdapter::new(
                Arc::new(DisabledBackend),
                RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(1),
                },
                10,
                100,
                1,
            ),
        );
        let spec = svc
            .prepare(VectorizeRequest::new("file:///srv/repos/widgets", "alice"))
            .unwrap();
        assert_eq!(spec.key.repo_name, "widgets");
    }

    #[test]
    fn test_prepare_normalizes_names() {
        let svc = service();
        let mut req = VectorizeRequest::new("https://github.com/org/widgets.git", " alice ");
        req.repo_name = Some(" custom\n".to_string());
        assert_eq!(svc.prepare(req).unwrap().key, NamespaceKey::new("alice", "custom"));
        assert_eq!(
            tenant_key("alice\t", " custom").unwrap(),
            NamespaceKey::new("alice", "custom")
        );
        assert!(tenant_key("alice", "  ").is_err());
    }

    #[tokio::test]
    async fn test_rejected_request_creates_no_job() {
        let svc = service();
        assert!(svc
            .start_vectorization(VectorizeRequest::new("nope", "alice"))
            .is_err());
        assert!(svc.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_and_repo() {
        let svc = service();
        assert!(matches!(
            svc.job_status("missing"),
            Err(VectorizeError::NotFound(_))
        ));
        assert!(matches!(
            svc.delete_repository("alice", "widgets").await,
            Err(VectorizeError::NotFound(_))
        ));
        assert!(svc.list_repositories("alice").await.unwrap().is_empty());
        assert!(matches!(
            svc.repository_stats("alice", "widgets").await,
            Err(VectorizeError::NotFound(_))
        ));
    }
}
