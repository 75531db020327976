//! Repository retrieval.
//!
//! The pipeline only needs a local directory holding the repository's files;
//! [`RepositoryFetcher`] is the seam. [`GitFetcher`] shells out to
//! `git clone --depth 1` into a per-job directory under the clone root.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::GitConfig;
use crate::error::{Result, VectorizeError};

/// What to fetch, and where the caller would like it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub auth_token: Option<String>,
    /// Unique per job; used to name the clone directory.
    pub job_id: String,
}

/// A repository available on the local filesystem.
#[derive(Debug, Clone)]
pub struct FetchedRepository {
    pub root: PathBuf,
    /// Whether [`RepositoryFetcher::release`] should delete `root`.
    pub remove_on_release: bool,
}

#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedRepository>;

    /// Dispose of a fetched repository once the job is done with it.
    async fn release(&self, repo: &FetchedRepository) -> Result<()> {
        if repo.remove_on_release && repo.root.exists() {
            tokio::fs::remove_dir_all(&repo.root).await?;
        }
        Ok(())
    }
}

/// Shallow `git clone` fetcher.
pub struct GitFetcher {
    clone_root: PathBuf,
    keep_clones: bool,
}

impl GitFetcher {
    pub fn new(clone_root: PathBuf, keep_clones: bool) -> Self {
        Self {
            clone_root,
            keep_clones,
        }
    }

    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(config.clone_root(), config.keep_clones)
    }
}

#[async_trait]
impl RepositoryFetcher for GitFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedRepository> {
        let dest = self.clone_root.join(&request.job_id);
        if dest.exists() {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        tokio::fs::create_dir_all(&self.clone_root).await?;

        let url = authenticated_url(&request.url, request.auth_token.as_deref());

        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--quiet"])
            .arg(&url)
            .arg(&dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| {
                VectorizeError::RepositoryUnavailable(format!(
                    "failed to execute 'git clone'. Is git installed? {}",
                    e
                ))
            })?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if let Some(token) = request.auth_token.as_deref().filter(|t| !t.is_empty()) {
                stderr = stderr.replace(token, "***");
            }
            if dest.exists() {
                let _ = tokio::fs::remove_dir_all(&dest).await;
            }
            return Err(VectorizeError::RepositoryUnavailable(format!(
                "git clone of {} failed: {}",
                request.url, stderr
            )));
        }

        Ok(FetchedRepository {
            root: dest,
            remove_on_release: !self.keep_clones,
        })
    }
}

/// Embed `token` as the user of an `https` URL. Other schemes, URLs that
/// already carry credentials, and missing tokens pass through unchanged.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.scheme() == "https" && parsed.username().is_empty() => {
            if parsed.set_username(token).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

/// Repository name implied by a URL: last path segment without `.git`.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_authenticated_url_injects_token() {
        assert_eq!(
            authenticated_url("https://github.com/org/repo.git", Some("s3cret")),
            "https://s3cret@github.com/org/repo.git"
        );
    }

    #[test]
    fn test_authenticated_url_passthrough() {
        let url = "https://github.com/org/repo.git";
        assert_eq!(authenticated_url(url, None), url);
        assert_eq!(authenticated_url(url, Some("")), url);
        assert_eq!(
            authenticated_url("git@github.com:org/repo.git", Some("t")),
            "git@github.com:org/repo.git"
        );
        assert_eq!(
            authenticated_url("https://me@github.com/org/repo.git", Some("t")),
            "https://me@github.com/org/repo.git"
        );
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(
            repo_name_from_url("https://github.com/org/widgets.git").as_deref(),
            Some("widgets")
        );
        assert_eq!(
            repo_name_from_url("https://github.com/org/widgets/").as_deref(),
            Some("widgets")
        );
        assert_eq!(
            repo_name_from_url("git@github.com:org/gadgets.git").as_deref(),
            Some("gadgets")
        );
        assert_eq!(repo_name_from_url("https://github.com/.git"), None);
    }

    #[tokio::test]
    async fn test_release_removes_only_when_asked() {
        let tmp = TempDir::new().unwrap();
        let fetcher = GitFetcher::new(tmp.path().to_path_buf(), false);

        let kept = tmp.path().join("kept");
        std::fs::create_dir_all(&kept).unwrap();
        fetcher
            .release(&FetchedRepository {
                root: kept.clone(),
                remove_on_release: false,
            })
            .await
            .unwrap();
        assert!(kept.exists());

        let removed = tmp.path().join("removed");
        std::fs::create_dir_all(removed.join("src")).unwrap();
        fetcher
            .release(&FetchedRepository {
                root: removed.clone(),
                remove_on_release: true,
            })
            .await
            .unwrap();
        assert!(!removed.exists());
    }

    #[tokio::test]
    async fn test_clone_failure_is_repository_unavailable() {
        let tmp = TempDir::new().unwrap();
        let fetcher = GitFetcher::new(tmp.path().to_path_buf(), false);
        let request = FetchRequest {
            url: tmp.path().join("does-not-exist").display().to_string(),
            auth_token: None,
            job_id: "job-1".to_string(),
        };
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, VectorizeError::RepositoryUnavailable(_)));
        assert!(!tmp.path().join("job-1").exists());
    }
}
