//! Shared fakes and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use code_vectorizer::config::Config;
use code_vectorizer::embedding::{EmbeddingAdapter, EmbeddingBackend, ProviderError, RetryPolicy};
use code_vectorizer::error::{Result, VectorizeError};
use code_vectorizer::fetch::{FetchRequest, FetchedRepository, RepositoryFetcher};
use code_vectorizer::models::{Job, JobStatus};
use code_vectorizer::service::VectorizerService;
use code_vectorizer::store::{MemoryStore, TenantStore};

pub const DIMS: usize = 64;

/// Serves repositories from local directories keyed by URL. Unknown URLs fail
/// like an unreachable remote.
#[derive(Default)]
pub struct DirFetcher {
    repos: Vec<(String, PathBuf)>,
    pub releases: AtomicUsize,
}

impl DirFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, url: &str, root: &Path) -> Self {
        self.repos.push((url.to_string(), root.to_path_buf()));
        self
    }
}

#[async_trait]
impl RepositoryFetcher for DirFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedRepository> {
        self.repos
            .iter()
            .find(|(url, _)| *url == request.url)
            .map(|(_, root)| FetchedRepository {
                root: root.clone(),
                remove_on_release: false,
            })
            .ok_or_else(|| {
                VectorizeError::RepositoryUnavailable(format!("cannot reach {}", request.url))
            })
    }

    async fn release(&self, _repo: &FetchedRepository) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Bag-of-words vectors: identical token multisets embed identically.
/// Any batch containing `poison` is rejected permanently.
pub struct HashBackend;

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.to_lowercase().bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        v[(hash % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingBackend for HashBackend {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(ProviderError::Permanent("HTTP 400: rejected input".to_string()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Always unavailable, like a provider that keeps returning 503.
pub struct DownBackend;

#[async_trait]
impl EmbeddingBackend for DownBackend {
    fn model_name(&self) -> &str {
        "down"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Transient("HTTP 503: service unavailable".to_string()))
    }
}

pub fn adapter(backend: Arc<dyn EmbeddingBackend>, batch_size: usize) -> EmbeddingAdapter {
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    EmbeddingAdapter::new(backend, retry, batch_size, 8191, 2)
}

pub fn service_with(
    store: Arc<dyn TenantStore>,
    fetcher: Arc<dyn RepositoryFetcher>,
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
) -> VectorizerService {
    VectorizerService::new(Config::minimal(), store, fetcher, adapter(backend, batch_size))
}

pub fn memory_service(fetcher: DirFetcher) -> VectorizerService {
    service_with(
        Arc::new(MemoryStore::new()),
        Arc::new(fetcher),
        Arc::new(HashBackend),
        10,
    )
}

/// `n` lines of `let <stem>_<i> = <func>(<i>);`, 9 tokens each with the break.
pub fn numbered_lines(stem: &str, func: &str, n: usize) -> String {
    (1..=n)
        .map(|i| format!("let {}_{} = {}({});", stem, i, func, i))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A 50-line and a 10-line source file.
pub fn two_file_repo(root: &Path) {
    write_file(root, "src/a.py", &numbered_lines("value", "compute", 50));
    write_file(root, "src/b.py", &numbered_lines("other", "render", 10));
}

pub async fn wait_for_job(service: &VectorizerService, job_id: &str) -> Job {
    for _ in 0..500 {
        let job = service.job_status(job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", job_id);
}

pub fn assert_progress_consistent(job: &Job) {
    let p = &job.progress;
    assert!(p.files_processed <= p.files_discovered, "{:?}", p);
    assert!(p.chunks_with_embeddings <= p.chunks_created, "{:?}", p);
    assert!(p.chunks_saved <= p.chunks_with_embeddings, "{:?}", p);
    assert!(job.updated_at >= job.created_at);
    assert_eq!(job.error.is_some(), job.status == JobStatus::Failed);
}
