//! Similarity search across a tenant's namespaces.
//!
//! The query is embedded once, each selected namespace is searched for its
//! best `limit` matches above the threshold, and the per-namespace results
//! are merged with the same ordering the store uses: similarity descending,
//! then file path, start line and repository ascending. `total` counts every
//! match above the threshold before truncation.
//!
//! Path search needs no embedding: it returns the chunks of files whose
//! repository-relative path contains a substring, ignoring case.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingAdapter;
use crate::error::{Result, VectorizeError};
use crate::models::{PathMatch, SearchResult};
use crate::store::{normalize_name, rank, Namespace, NamespaceKey, TenantStore};

/// Result count of a path search that names no limit.
pub const DEFAULT_PATH_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub username: String,
    /// Restrict to one repository; all of the user's repositories otherwise.
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSearchRequest {
    pub pattern: String,
    pub username: String,
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathSearchResponse {
    pub results: Vec<PathMatch>,
    pub pattern: String,
}

pub struct SearchEngine {
    store: Arc<dyn TenantStore>,
    embedder: EmbeddingAdapter,
    retrieval: RetrievalConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn TenantStore>,
        embedder: EmbeddingAdapter,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            retrieval,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(VectorizeError::Validation("query must not be empty".to_string()));
        }
        let limit = self.check_limit(request.limit.unwrap_or(self.retrieval.default_limit))?;

        let threshold = request
            .similarity_threshold
            .unwrap_or(self.retrieval.similarity_threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(VectorizeError::Validation(
                "similarity_threshold must be between -1 and 1".to_string(),
            ));
        }

        let namespaces = self
            .namespaces(&request.username, request.repo_name.as_deref())
            .await?;

        if namespaces.is_empty() {
            return Ok(SearchResponse {
                results: Vec::new(),
                total: 0,
                query: request.query.clone(),
            });
        }

        let query_vector = self.embedder.embed_query(query).await?;

        let mut total = 0;
        let mut results = Vec::new();
        for ns in &namespaces {
            let matches = self
                .store
                .search(ns, &query_vector, limit, threshold)
                .await?;
            total += matches.total;
            results.extend(matches.results);
        }
        rank(&mut results);
        results.truncate(limit);

        tracing::debug!(
            username = %request.username,
            namespaces = namespaces.len(),
            total,
            returned = results.len(),
            "search complete"
        );

        Ok(SearchResponse {
            results,
            total,
            query: request.query.clone(),
        })
    }

    /// Chunks of files whose path contains `pattern`, ordered by path, start
    /// line and repository.
    pub async fn search_by_path(
        &self,
        request: &PathSearchRequest,
    ) -> Result<PathSearchResponse> {
        let pattern = request.pattern.trim();
        if pattern.is_empty() {
            return Err(VectorizeError::Validation(
                "pattern must not be empty".to_string(),
            ));
        }
        let limit = self.check_limit(
            request
                .limit
                .unwrap_or(DEFAULT_PATH_LIMIT.min(self.retrieval.max_limit)),
        )?;

        let namespaces = self
            .namespaces(&request.username, request.repo_name.as_deref())
            .await?;
        let mut results = Vec::new();
        for ns in &namespaces {
            results.extend(self.store.find_by_path(ns, pattern, limit).await?);
        }
        results.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.start_line.cmp(&b.start_line))
                .then_with(|| a.repo_name.cmp(&b.repo_name))
        });
        results.truncate(limit);

        tracing::debug!(
            username = %request.username,
            pattern,
            returned = results.len(),
            "path search complete"
        );
        Ok(PathSearchResponse {
            results,
            pattern: pattern.to_string(),
        })
    }

    fn check_limit(&self, limit: usize) -> Result<usize> {
        if limit == 0 || limit > self.retrieval.max_limit {
            return Err(VectorizeError::Validation(format!(
                "limit must be between 1 and {}",
                self.retrieval.max_limit
            )));
        }
        Ok(limit)
    }

    /// The named repository, or every repository of `username`.
    async fn namespaces(
        &self,
        username: &str,
        repo_name: Option<&str>,
    ) -> Result<Vec<Namespace>> {
        let username = normalize_name(username);
        if username.is_empty() {
            return Err(VectorizeError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        match repo_name.map(normalize_name).filter(|name| !name.is_empty()) {
            Some(repo_name) => {
                let key = NamespaceKey::new(username, repo_name);
                if !self.store.namespace_exists(&key).await? {
                    return Err(VectorizeError::NotFound(format!(
                        "repository {} for user {}",
                        repo_name, username
                    )));
                }
                Ok(vec![Namespace::new(key)])
            }
            None => self.store.list_namespaces(username).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBackend, ProviderError, RetryPolicy};
    use crate::models::{NewCodeChunk, NewCodeFile, NewRepository};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Every query embeds to the unit x-axis.
    struct AxisBackend;

    #[async_trait]
    impl EmbeddingBackend for AxisBackend {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// A unit vector whose cosine with the x-axis is `sim`.
    fn at_similarity(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    fn engine(store: Arc<dyn TenantStore>) -> SearchEngine {
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let embedder = EmbeddingAdapter::new(Arc::new(AxisBackend), retry, 10, 100, 1);
        SearchEngine::new(store, embedder, RetrievalConfig::default())
    }

    async fn seed(store: &MemoryStore, user: &str, repo: &str, sims: &[(&str, f32)]) {
        let ns = store
            .ensure_namespace(&NamespaceKey::new(user, repo))
            .await
            .unwrap();
        let row = store
            .upsert_repository(
                &ns,
                NewRepository {
                    name: repo.to_string(),
                    source_url: format!("https://example.com/{}.git", repo),
                    local_clone_path: None,
                },
            )
            .await
            .unwrap();
        for (path, sim) in sims {
            store
                .save_file(
                    &ns,
                    NewCodeFile {
                        repository_id: row.id.clone(),
                        path: path.to_string(),
                        name: path.to_string(),
                        extension: "rs".to_string(),
                        size_bytes: 1,
                        content_hash: "h".to_string(),
                    },
                    &[NewCodeChunk {
                        chunk_index: 0,
                        content: format!("// {}", path),
                        start_line: 1,
                        end_line: 1,
                        token_count: 3,
                        embedding: at_similarity(*sim),
                    }],
                )
                .await
                .unwrap();
        }
    }

    fn request(user: &str, repo: Option<&str>) -> SearchRequest {
        SearchRequest {
            query: "parse config".to_string(),
            username: user.to_string(),
            repo_name: repo.map(String::from),
            limit: None,
            similarity_threshold: None,
        }
    }

    #[tokio::test]
    async fn test_threshold_filters_and_orders() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "widgets", &[("a.rs", 0.5), ("b.rs", 0.9), ("c.rs", 0.75)]).await;

        let response = engine(store).search(&request("alice", None)).await.unwrap();
        let paths: Vec<&str> = response.results.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["b.rs", "c.rs"]);
        assert_eq!(response.total, 2);
        assert!((response.results[0].similarity - 0.9).abs() < 1e-4);
        assert_eq!(response.query, "parse config");
    }

    #[tokio::test]
    async fn test_total_counts_before_truncation() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "one", &[("a.rs", 0.8), ("b.rs", 0.85)]).await;
        seed(&store, "alice", "two", &[("c.rs", 0.95), ("d.rs", 0.75)]).await;

        let mut req = request("alice", None);
        req.limit = Some(2);
        let response = engine(store).search(&req).await.unwrap();
        assert_eq!(response.total, 4);
        let paths: Vec<&str> = response.results.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["c.rs", "b.rs"]);
        assert_eq!(response.results[0].repo_name, "two");
    }

    #[tokio::test]
    async fn test_named_repo_scopes_and_isolates_tenants() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "widgets", &[("alice.rs", 0.9)]).await;
        seed(&store, "alice", "gadgets", &[("gadget.rs", 0.9)]).await;
        seed(&store, "bob", "widgets", &[("bob.rs", 0.99)]).await;

        let engine = engine(store);
        let response = engine
            .search(&request("alice", Some("widgets")))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].file_path, "alice.rs");

        let all = engine.search(&request("alice", None)).await.unwrap();
        assert!(all.results.iter().all(|r| r.file_path != "bob.rs"));
        assert_eq!(all.total, 2);
    }

    #[tokio::test]
    async fn test_missing_named_repo_is_not_found() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let err = engine
            .search(&request("alice", Some("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorizeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_user_without_repos_gets_empty_results() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let response = engine.search(&request("nobody", None)).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn test_padded_names_reach_same_namespace() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "widgets", &[("a.rs", 0.9)]).await;

        let engine = engine(store);
        let response = engine
            .search(&request(" alice", Some("widgets ")))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        let all = engine.search(&request("alice\t", None)).await.unwrap();
        assert_eq!(all.total, 1);
    }

    fn path_request(pattern: &str, repo: Option<&str>) -> PathSearchRequest {
        PathSearchRequest {
            pattern: pattern.to_string(),
            username: "alice".to_string(),
            repo_name: repo.map(String::from),
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_path_search_spans_repositories() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", "one", &[("src/config.rs", 0.1), ("src/main.rs", 0.1)]).await;
        seed(&store, "alice", "two", &[("lib/Config.rs", 0.1)]).await;
        seed(&store, "bob", "one", &[("src/config.rs", 0.1)]).await;

        let engine = engine(store);
        let response = engine
            .search_by_path(&path_request("CONFIG", None))
            .await
            .unwrap();
        let found: Vec<(&str, &str)> = response
            .results
            .iter()
            .map(|m| (m.repo_name.as_str(), m.file_path.as_str()))
            .collect();
        assert_eq!(found, vec![("two", "lib/Config.rs"), ("one", "src/config.rs")]);
        assert_eq!(response.pattern, "CONFIG");

        let scoped = engine
            .search_by_path(&path_request("config", Some("one")))
            .await
            .unwrap();
        assert_eq!(scoped.results.len(), 1);
        assert_eq!(scoped.results[0].content, "// src/config.rs");
    }

    #[tokio::test]
    async fn test_path_search_limit_and_validation() {
        let store = Arc::new(MemoryStore::new());
        let files: Vec<(String, f32)> = (0..25).map(|i| (format!("src/m{:02}.rs", i), 0.1)).collect();
        let refs: Vec<(&str, f32)> = files.iter().map(|(p, s)| (p.as_str(), *s)).collect();
        seed(&store, "alice", "widgets", &refs).await;

        let engine = engine(store);
        let response = engine.search_by_path(&path_request("src/", None)).await.unwrap();
        assert_eq!(response.results.len(), DEFAULT_PATH_LIMIT);
        assert_eq!(response.results[0].file_path, "src/m00.rs");

        assert!(matches!(
            engine.search_by_path(&path_request("  ", None)).await,
            Err(VectorizeError::Validation(_))
        ));
        assert!(matches!(
            engine.search_by_path(&path_request("src", Some("nope"))).await,
            Err(VectorizeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_validation() {
        let engine = engine(Arc::new(MemoryStore::new()));

        let mut req = request("alice", None);
        req.query = "   ".to_string();
        assert!(matches!(
            engine.search(&req).await,
            Err(VectorizeError::Validation(_))
        ));

        let mut req = request("alice", None);
        req.limit = Some(0);
        assert!(engine.search(&req).await.is_err());

        let mut req = request("alice", None);
        req.limit = Some(1000);
        assert!(engine.search(&req).await.is_err());

        let mut req = request("alice", None);
        req.similarity_threshold = Some(1.5);
        assert!(engine.search(&req).await.is_err());
    }
}
