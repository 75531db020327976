//! SQLite-backed [`TenantStore`].
//!
//! Each namespace is a set of three tables in the shared database, named
//! after the namespace id:
//!
//! ```text
//! <ns>_repositories (id, name UNIQUE, source_url, local_clone_path, status, created_at, updated_at)
//! <ns>_code_files   (id, repository_id → repositories ON DELETE CASCADE, path, name, extension, size_bytes, content_hash)
//! <ns>_code_chunks  (id, file_id → code_files ON DELETE CASCADE, chunk_index, content, start_line, end_line, token_count, embedding BLOB)
//! ```
//!
//! Namespace ids are hex plus `_`, so they are spliced into statements
//! directly; all values are bound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Result, VectorizeError};
use crate::models::{
    CodeFile, ExtensionStats, NewCodeChunk, NewCodeFile, NewRepository, PathMatch, Repository,
    RepositoryStats, RepositoryStatus, RepositorySummary, SearchResult,
};

use super::{
    select_matches, sort_extensions, user_prefix, Namespace, NamespaceKey, ScoredMatches,
    TenantStore,
};

const REPOSITORIES: &str = "_repositories";

/// SQLite implementation of [`TenantStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn load_repository(&self, ns: &Namespace) -> Result<Option<Repository>> {
        let t = Tables::of(&ns.id);
        let row = sqlx::query(&format!(
            "SELECT id, name, source_url, local_clone_path, status, created_at, updated_at \
             FROM {} LIMIT 1",
            t.repositories
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Repository {
            id: row.get("id"),
            name: row.get("name"),
            source_url: row.get("source_url"),
            local_clone_path: row.get("local_clone_path"),
            status: RepositoryStatus::parse(row.get::<String, _>("status").as_str()),
            created_at: from_ts(row.get("created_at")),
            updated_at: from_ts(row.get("updated_at")),
        }))
    }
}

struct Tables {
    repositories: String,
    files: String,
    chunks: String,
}

impl Tables {
    fn of(ns_id: &str) -> Self {
        Self {
            repositories: format!("{}{}", ns_id, REPOSITORIES),
            files: format!("{}_code_files", ns_id),
            chunks: format!("{}_code_chunks", ns_id),
        }
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

/// `%pattern%` for `LIKE ... ESCAPE '\'`, lowercased, with wildcards in
/// `pattern` taken literally.
fn like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('%');
    for c in pattern.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn not_found(key: &NamespaceKey) -> VectorizeError {
    VectorizeError::NotFound(format!(
        "repository {} for user {}",
        key.repo_name, key.username
    ))
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn ensure_namespace(&self, key: &NamespaceKey) -> Result<Namespace> {
        let ns = Namespace::new(key.clone());
        let t = Tables::of(&ns.id);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {repos} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                source_url TEXT NOT NULL,
                local_clone_path TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            repos = t.repositories
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {files} (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                extension TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                FOREIGN KEY (repository_id) REFERENCES {repos}(id) ON DELETE CASCADE
            )
            "#,
            files = t.files,
            repos = t.repositories
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {chunks} (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(file_id, chunk_index),
                FOREIGN KEY (file_id) REFERENCES {files}(id) ON DELETE CASCADE
            )
            "#,
            chunks = t.chunks,
            files = t.files
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {files}_repository_id ON {files}(repository_id)",
            files = t.files
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {chunks}_file_id ON {chunks}(file_id)",
            chunks = t.chunks
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ns)
    }

    async fn namespace_exists(&self, key: &NamespaceKey) -> Result<bool> {
        self.table_exists(&Tables::of(&key.namespace_id()).repositories)
            .await
    }

    async fn upsert_repository(&self, ns: &Namespace, repo: NewRepository) -> Result<Repository> {
        let t = Tables::of(&ns.id);
        let now = Utc::now().timestamp_millis();

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, name, source_url, local_clone_path, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                source_url = excluded.source_url,
                local_clone_path = excluded.local_clone_path,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            t.repositories
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&repo.name)
        .bind(&repo.source_url)
        .bind(&repo.local_clone_path)
        .bind(RepositoryStatus::Processing.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.load_repository(ns).await?.ok_or_else(|| {
            VectorizeError::Storage(format!("repository row missing after upsert in {}", ns.id))
        })
    }

    async fn set_repository_status(
        &self,
        ns: &Namespace,
        repository_id: &str,
        status: RepositoryStatus,
    ) -> Result<()> {
        let t = Tables::of(&ns.id);
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE id = ?",
            t.repositories
        ))
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(repository_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VectorizeError::NotFound(format!(
                "repository {}",
                repository_id
            )));
        }
        Ok(())
    }

    async fn save_file(
        &self,
        ns: &Namespace,
        file: NewCodeFile,
        chunks: &[NewCodeChunk],
    ) -> Result<CodeFile> {
        let t = Tables::of(&ns.id);
        let row = CodeFile {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: file.repository_id,
            path: file.path,
            name: file.name,
            extension: file.extension,
            size_bytes: file.size_bytes,
            content_hash: file.content_hash,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, repository_id, path, name, extension, size_bytes, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            t.files
        ))
        .bind(&row.id)
        .bind(&row.repository_id)
        .bind(&row.path)
        .bind(&row.name)
        .bind(&row.extension)
        .bind(row.size_bytes as i64)
        .bind(&row.content_hash)
        .execute(&mut *tx)
        .await?;

        let insert_chunk = format!(
            r#"
            INSERT INTO {} (id, file_id, chunk_index, content, start_line, end_line, token_count, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            t.chunks
        );
        for chunk in chunks {
            sqlx::query(&insert_chunk)
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&row.id)
                .bind(chunk.chunk_index as i64)
                .bind(&chunk.content)
                .bind(chunk.start_line as i64)
                .bind(chunk.end_line as i64)
                .bind(chunk.token_count as i64)
                .bind(vec_to_blob(&chunk.embedding))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn list_namespaces(&self, username: &str) -> Result<Vec<Namespace>> {
        let prefix = user_prefix(username);
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let mut found = Vec::new();
        for table in tables {
            let Some(ns_id) = table
                .strip_suffix(REPOSITORIES)
                .filter(|id| id.starts_with(&prefix))
            else {
                continue;
            };
            let name: Option<String> =
                sqlx::query_scalar(&format!("SELECT name FROM {} LIMIT 1", table))
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(repo_name) = name {
                let key = NamespaceKey::new(username, repo_name);
                // Guards against a hash-prefix collision with another user.
                if key.namespace_id() == ns_id {
                    found.push(Namespace::new(key));
                }
            }
        }
        found.sort_by(|a, b| a.key.repo_name.cmp(&b.key.repo_name));
        Ok(found)
    }

    async fn list_repositories(&self, username: &str) -> Result<Vec<RepositorySummary>> {
        let mut summaries = Vec::new();
        for ns in self.list_namespaces(username).await? {
            let Some(repo) = self.load_repository(&ns).await? else {
                continue;
            };
            let t = Tables::of(&ns.id);
            let file_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", t.files))
                .fetch_one(&self.pool)
                .await?;
            let chunk_count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", t.chunks))
                    .fetch_one(&self.pool)
                    .await?;
            summaries.push(RepositorySummary {
                repo_name: repo.name,
                repo_url: repo.source_url,
                status: repo.status,
                created_at: repo.created_at,
                updated_at: repo.updated_at,
                file_count: file_count as u64,
                chunk_count: chunk_count as u64,
                namespace: ns.id,
            });
        }
        Ok(summaries)
    }

    async fn delete_namespace(&self, key: &NamespaceKey) -> Result<()> {
        if !self.namespace_exists(key).await? {
            return Err(not_found(key));
        }
        let t = Tables::of(&key.namespace_id());

        let mut tx = self.pool.begin().await?;
        for table in [&t.chunks, &t.files, &t.repositories] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(namespace = %key.namespace_id(), "namespace dropped");
        Ok(())
    }

    async fn repository_stats(&self, key: &NamespaceKey) -> Result<RepositoryStats> {
        if !self.namespace_exists(key).await? {
            return Err(not_found(key));
        }
        let ns = Namespace::new(key.clone());
        let repo = self
            .load_repository(&ns)
            .await?
            .ok_or_else(|| not_found(key))?;
        let t = Tables::of(&ns.id);

        let rows = sqlx::query(&format!(
            "SELECT extension, COUNT(*) AS file_count, COALESCE(SUM(size_bytes), 0) AS total_size              FROM {} GROUP BY extension",
            t.files
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut extensions: Vec<ExtensionStats> = rows
            .iter()
            .map(|row| ExtensionStats {
                extension: row.get("extension"),
                file_count: row.get::<i64, _>("file_count") as u64,
                total_size_bytes: row.get::<i64, _>("total_size") as u64,
            })
            .collect();
        sort_extensions(&mut extensions);

        let chunk_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", t.chunks))
            .fetch_one(&self.pool)
            .await?;

        Ok(RepositoryStats {
            repo_name: repo.name,
            repo_url: repo.source_url,
            status: repo.status,
            created_at: repo.created_at,
            updated_at: repo.updated_at,
            file_count: extensions.iter().map(|e| e.file_count).sum(),
            chunk_count: chunk_count as u64,
            total_size_bytes: extensions.iter().map(|e| e.total_size_bytes).sum(),
            extensions,
            namespace: ns.id,
        })
    }

    async fn find_by_path(
        &self,
        ns: &Namespace,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<PathMatch>> {
        let t = Tables::of(&ns.id);
        let rows = sqlx::query(&format!(
            r#"
            SELECT r.name AS repo_name, f.path, f.name AS file_name,
                   c.start_line, c.end_line, c.token_count, c.content
            FROM {chunks} c
            JOIN {files} f ON f.id = c.file_id
            JOIN {repos} r ON r.id = f.repository_id
            WHERE LOWER(f.path) LIKE ? ESCAPE '\'
            ORDER BY f.path, c.start_line
            LIMIT ?
            "#,
            chunks = t.chunks,
            files = t.files,
            repos = t.repositories
        ))
        .bind(like_pattern(pattern))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PathMatch {
                repo_name: row.get("repo_name"),
                file_path: row.get("path"),
                file_name: row.get("file_name"),
                start_line: row.get::<i64, _>("start_line") as usize,
                end_line: row.get::<i64, _>("end_line") as usize,
                token_count: row.get::<i64, _>("token_count") as usize,
                content: row.get("content"),
            })
            .collect())
    }

    async fn search(
        &self,
        ns: &Namespace,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<ScoredMatches> {
        let t = Tables::of(&ns.id);
        let rows = sqlx::query(&format!(
            r#"
            SELECT r.name AS repo_name, f.path, f.name AS file_name,
                   c.start_line, c.end_line, c.token_count, c.content, c.embedding
            FROM {chunks} c
            JOIN {files} f ON f.id = c.file_id
            JOIN {repos} r ON r.id = f.repository_id
            "#,
            chunks = t.chunks,
            files = t.files,
            repos = t.repositories
        ))
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                SearchResult {
                    repo_name: row.get("repo_name"),
                    file_path: row.get("path"),
                    file_name: row.get("file_name"),
                    start_line: row.get::<i64, _>("start_line") as usize,
                    end_line: row.get::<i64, _>("end_line") as usize,
                    token_count: row.get::<i64, _>("token_count") as usize,
                    content: row.get("content"),
                    similarity: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(select_matches(candidates, limit, threshold))
    }
}
