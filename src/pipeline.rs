//! Ingestion pipeline: fetch → discover → chunk → embed → persist.
//!
//! Each job runs on its own `tokio` task and walks the step sequence
//! `cloning_repository → discovering_files → processing_files →
//! generating_embeddings → saving_chunks → completed`, publishing progress to
//! the [`JobRegistry`] as it goes.
//!
//! Failures are handled at two levels:
//! - **Per item**: an unreadable file, an over-budget chunk, or a batch the
//!   provider rejects is logged, counted as skipped, and the job continues.
//! - **Per job**: fetch failure, an empty repository, nothing embeddable, or
//!   a storage error marks the job `failed` with a message. Files already
//!   saved stay in the namespace.
//!
//! Re-ingesting an existing repository deletes its namespace first, so a
//! job always starts from empty storage.
//!
//! File reading and chunking run on the blocking pool with bounded
//! parallelism; embedding batches run with bounded concurrency. Both consume
//! results in input order, so chunk order is reproducible.

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::chunk::{Chunker, TextChunk};
use crate::discover::{discover_files, DiscoveredFile, DiscoveryFilter};
use crate::embedding::EmbeddingAdapter;
use crate::error::{Result, VectorizeError};
use crate::fetch::{FetchRequest, FetchedRepository, RepositoryFetcher};
use crate::jobs::JobRegistry;
use crate::models::{NewCodeChunk, NewCodeFile, NewRepository, PipelineStep, RepositoryStatus};
use crate::store::{Namespace, NamespaceKey, TenantStore};

/// Everything a job needs besides its own parameters.
pub struct Pipeline {
    pub store: Arc<dyn TenantStore>,
    pub fetcher: Arc<dyn RepositoryFetcher>,
    pub embedder: EmbeddingAdapter,
    pub jobs: Arc<JobRegistry>,
    pub file_concurrency: usize,
}

/// Parameters of one vectorization run, validated before the job exists.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub key: NamespaceKey,
    pub repo_url: String,
    pub auth_token: Option<String>,
    pub chunker: Chunker,
    pub filter: DiscoveryFilter,
}

/// One file after reading and chunking.
struct ProcessedFile {
    file: DiscoveredFile,
    content_hash: String,
    chunks: Vec<TextChunk>,
}

/// Resources acquired so far, released or marked on the way out.
#[derive(Default)]
struct RunState {
    fetched: Option<FetchedRepository>,
    namespace: Option<Namespace>,
    repository_id: Option<String>,
}

impl Pipeline {
    /// Run `spec` in the background.
    pub fn spawn(self: &Arc<Self>, spec: JobSpec) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(spec).await })
    }

    /// Run `spec` to completion. Outcomes are recorded in the job registry,
    /// never returned.
    pub async fn run(&self, spec: JobSpec) {
        let mut state = RunState::default();
        let outcome = self.execute(&spec, &mut state).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = self.jobs.complete(&spec.job_id) {
                    tracing::warn!(job_id = %spec.job_id, error = %e, "could not record job completion");
                }
                tracing::info!(job_id = %spec.job_id, "job completed");
            }
            Err(e) => {
                tracing::error!(job_id = %spec.job_id, error = %e, "job failed");
                if let (Some(ns), Some(repo_id)) = (&state.namespace, &state.repository_id) {
                    if let Err(status_err) = self
                        .store
                        .set_repository_status(ns, repo_id, RepositoryStatus::Failed)
                        .await
                    {
                        tracing::warn!(error = %status_err, "could not mark repository failed");
                    }
                }
                if let Err(record_err) = self.jobs.fail(&spec.job_id, e.to_string()) {
                    tracing::warn!(job_id = %spec.job_id, error = %record_err, "could not record job failure");
                }
            }
        }

        if let Some(fetched) = &state.fetched {
            if let Err(e) = self.fetcher.release(fetched).await {
                tracing::warn!(path = %fetched.root.display(), error = %e, "could not remove clone");
            }
        }
    }

    async fn execute(&self, spec: &JobSpec, state: &mut RunState) -> Result<()> {
        let job_id = spec.job_id.as_str();

        // ── cloning_repository ──
        self.jobs.set_step(job_id, PipelineStep::CloningRepository)?;
        tracing::info!(job_id, url = %spec.repo_url, "fetching repository");
        let fetched = self
            .fetcher
            .fetch(&FetchRequest {
                url: spec.repo_url.clone(),
                auth_token: spec.auth_token.clone(),
                job_id: job_id.to_string(),
            })
            .await?;
        let root = fetched.root.clone();
        state.fetched = Some(fetched);

        if self.store.namespace_exists(&spec.key).await? {
            tracing::info!(job_id, namespace = %spec.key.namespace_id(), "replacing existing namespace");
            self.store.delete_namespace(&spec.key).await?;
        }
        let ns = self.store.ensure_namespace(&spec.key).await?;
        state.namespace = Some(ns.clone());
        let repo = self
            .store
            .upsert_repository(
                &ns,
                NewRepository {
                    name: spec.key.repo_name.clone(),
                    source_url: spec.repo_url.clone(),
                    local_clone_path: Some(root.display().to_string()),
                },
            )
            .await?;
        state.repository_id = Some(repo.id.clone());

        // ── discovering_files ──
        self.jobs.set_step(job_id, PipelineStep::DiscoveringFiles)?;
        let filter = spec.filter.clone();
        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || discover_files(&walk_root, &filter))
            .await
            .map_err(join_error)??;
        self.jobs
            .update_progress(job_id, |p| p.files_discovered = files.len() as u64)?;
        tracing::info!(job_id, files = files.len(), "files discovered");
        if files.is_empty() {
            return Err(VectorizeError::Validation(
                "no eligible files found in repository".to_string(),
            ));
        }

        // ── processing_files ──
        self.jobs.set_step(job_id, PipelineStep::ProcessingFiles)?;
        let processed = self.process_files(job_id, files, spec.chunker).await?;

        // ── generating_embeddings ──
        self.jobs.set_step(job_id, PipelineStep::GeneratingEmbeddings)?;
        let embeddings = self.embed_chunks(job_id, &processed).await?;

        // ── saving_chunks ──
        self.jobs.set_step(job_id, PipelineStep::SavingChunks)?;
        for (item, vectors) in processed.into_iter().zip(embeddings) {
            let chunks: Vec<NewCodeChunk> = item
                .chunks
                .into_iter()
                .zip(vectors)
                .filter_map(|(chunk, vector)| {
                    vector.map(|embedding| NewCodeChunk {
                        chunk_index: chunk.index,
                        content: chunk.content,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        token_count: chunk.token_count,
                        embedding,
                    })
                })
                .collect();
            if chunks.is_empty() {
                continue;
            }

            self.store
                .save_file(
                    &ns,
                    NewCodeFile {
                        repository_id: repo.id.clone(),
                        path: item.file.relative_path,
                        name: item.file.name,
                        extension: item.file.extension,
                        size_bytes: item.file.size_bytes,
                        content_hash: item.content_hash,
                    },
                    &chunks,
                )
                .await?;
            self.jobs
                .update_progress(job_id, |p| p.chunks_saved += chunks.len() as u64)?;
        }

        self.store
            .set_repository_status(&ns, &repo.id, RepositoryStatus::Completed)
            .await?;
        let progress = self.jobs.get(job_id)?.progress;
        tracing::info!(
            job_id,
            files = progress.files_processed,
            chunks_saved = progress.chunks_saved,
            chunks_skipped = progress.chunks_skipped,
            "repository indexed"
        );
        Ok(())
    }

    /// Read, hash and chunk every file, in discovery order.
    async fn process_files(
        &self,
        job_id: &str,
        files: Vec<DiscoveredFile>,
        chunker: Chunker,
    ) -> Result<Vec<ProcessedFile>> {
        let mut results = stream::iter(files)
            .map(move |file| {
                tokio::task::spawn_blocking(move || {
                    let path = file.relative_path.clone();
                    (path, process_file(file, chunker))
                })
            })
            .buffered(self.file_concurrency.max(1));

        let mut processed = Vec::new();
        let mut readable = 0usize;
        while let Some(joined) = results.next().await {
            let (path, outcome) = joined.map_err(join_error)?;
            match outcome {
                Ok(item) => {
                    readable += 1;
                    let created = item.chunks.len() as u64;
                    self.jobs.update_progress(job_id, |p| {
                        p.files_processed += 1;
                        p.chunks_created += created;
                        p.current_file = Some(path.clone());
                    })?;
                    if !item.chunks.is_empty() {
                        processed.push(item);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, path = %path, error = %e, "skipping unreadable file");
                    self.jobs.update_progress(job_id, |p| {
                        p.files_processed += 1;
                        p.files_skipped += 1;
                        p.current_file = Some(path.clone());
                    })?;
                }
            }
        }

        if readable == 0 {
            return Err(VectorizeError::Validation(
                "no file in the repository could be read".to_string(),
            ));
        }
        if processed.is_empty() {
            return Err(VectorizeError::Validation(
                "repository files contain no text to index".to_string(),
            ));
        }
        Ok(processed)
    }

    /// Embed every chunk that fits the provider budget.
    ///
    /// Returns, per file, one slot per chunk: `Some(vector)` if embedded.
    async fn embed_chunks(
        &self,
        job_id: &str,
        processed: &[ProcessedFile],
    ) -> Result<Vec<Vec<Option<Vec<f32>>>>> {
        let mut slots: Vec<Vec<Option<Vec<f32>>>> = processed
            .iter()
            .map(|item| vec![None; item.chunks.len()])
            .collect();

        let mut eligible: Vec<(usize, usize)> = Vec::new();
        let mut oversized = 0u64;
        for (fi, item) in processed.iter().enumerate() {
            for (ci, chunk) in item.chunks.iter().enumerate() {
                if self.embedder.fits(&chunk.content) {
                    eligible.push((fi, ci));
                } else {
                    tracing::warn!(
                        job_id,
                        path = %item.file.relative_path,
                        start_line = chunk.start_line,
                        "chunk exceeds embedding input limit, skipping"
                    );
                    oversized += 1;
                }
            }
        }
        if oversized > 0 {
            self.jobs
                .update_progress(job_id, |p| p.chunks_skipped += oversized)?;
        }

        let batch_size = self.embedder.batch_size();
        let total_batches = eligible.len().div_ceil(batch_size);
        tracing::info!(
            job_id,
            chunks = eligible.len(),
            batches = total_batches,
            "generating embeddings"
        );

        let owned: Vec<Vec<(usize, usize)>> =
            eligible.chunks(batch_size).map(<[_]>::to_vec).collect();
        let mut batches = stream::iter(owned)
            .map(|batch| {
                let texts: Vec<String> = batch
                    .iter()
                    .map(|&(fi, ci)| processed[fi].chunks[ci].content.clone())
                    .collect();
                let embedder = self.embedder.clone();
                async move {
                    let outcome = embedder.embed_batch(&texts).await;
                    (batch, outcome)
                }
            })
            .buffered(self.embedder.concurrency());

        let mut embedded = 0usize;
        let mut last_error = None;
        while let Some((batch, outcome)) = batches.next().await {
            match outcome {
                Ok(vectors) => {
                    let n = vectors.len() as u64;
                    for (&(fi, ci), vector) in batch.iter().zip(vectors) {
                        slots[fi][ci] = Some(vector);
                    }
                    embedded += batch.len();
                    self.jobs
                        .update_progress(job_id, |p| p.chunks_with_embeddings += n)?;
                }
                Err(e) => {
                    tracing::warn!(job_id, chunks = batch.len(), error = %e, "embedding batch failed");
                    let n = batch.len() as u64;
                    self.jobs
                        .update_progress(job_id, |p| p.chunks_skipped += n)?;
                    last_error = Some(e);
                }
            }
        }

        if embedded == 0 {
            let reason = match last_error {
                Some(e) => e.to_string(),
                None => "every chunk exceeds the embedding input limit".to_string(),
            };
            return Err(VectorizeError::EmbeddingUnavailable(format!(
                "no chunks could be embedded: {}",
                reason
            )));
        }
        Ok(slots)
    }
}

fn process_file(file: DiscoveredFile, chunker: Chunker) -> Result<ProcessedFile> {
    let bytes = std::fs::read(&file.path)?;
    let content_hash = format!("{:x}", Sha256::digest(&bytes));
    let text = String::from_utf8_lossy(&bytes);
    let chunks = chunker.chunks(&text).collect();
    Ok(ProcessedFile {
        file,
        content_hash,
        chunks,
    })
}

fn join_error(e: tokio::task::JoinError) -> VectorizeError {
    VectorizeError::Storage(format!("worker task failed: {}", e))
}
