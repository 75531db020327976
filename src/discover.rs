//! Eligible-file discovery inside a fetched repository.
//!
//! A file is eligible when its path matches no ignore glob, its extension is
//! on the allow-list, its size is within bounds, and its first KiB contains
//! no NUL byte. Results are sorted by relative path so every run over the
//! same tree sees files in the same order.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::error::{Result, VectorizeError};

/// Bytes inspected by the binary sniff.
const SNIFF_LEN: usize = 1024;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub name: String,
    /// Lowercase, without the dot.
    pub extension: String,
    pub size_bytes: u64,
}

/// Compiled discovery filters.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    extensions: HashSet<String>,
    ignore: GlobSet,
    max_file_size: u64,
}

impl DiscoveryFilter {
    pub fn new(extensions: &[String], ignore_globs: &[String], max_file_size: u64) -> Result<Self> {
        Ok(Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            ignore: build_globset(ignore_globs)?,
            max_file_size,
        })
    }

    /// Filter from configuration, with a per-request file size override.
    pub fn from_config(config: &ChunkingConfig, max_file_size: Option<u64>) -> Result<Self> {
        Self::new(
            &config.extensions,
            &config.ignore_globs,
            max_file_size.unwrap_or(config.max_file_size),
        )
    }
}

/// Walk `root` and return eligible files in path order.
pub fn discover_files(root: &Path, filter: &DiscoveryFilter) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(VectorizeError::RepositoryUnavailable(format!(
            "repository root does not exist: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if filter.ignore.is_match(&rel_str) {
            continue;
        }

        let extension = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_lowercase(),
            None => continue,
        };
        if !filter.extensions.contains(&extension) {
            continue;
        }

        let size_bytes = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if size_bytes > filter.max_file_size {
            tracing::debug!(path = %rel_str, size_bytes, "skipping oversized file");
            continue;
        }

        if looks_binary(path) {
            tracing::debug!(path = %rel_str, "skipping binary file");
            continue;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative_path: rel_str,
            name,
            extension,
            size_bytes,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(files)
}

/// A NUL byte in the first KiB marks a file as binary. Unreadable files are
/// left for the reader to report.
fn looks_binary(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return false,
        }
    }
    buf[..filled].contains(&0)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            VectorizeError::Validation(format!("invalid ignore glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| VectorizeError::Validation(format!("invalid ignore globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn filter(max: u64) -> DiscoveryFilter {
        let config = ChunkingConfig::default();
        DiscoveryFilter::new(&config.extensions, &config.ignore_globs, max).unwrap()
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discovers_sorted_supported_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/main.rs", b"fn main() {}");
        write(tmp.path(), "app.py", b"print('hi')");
        write(tmp.path(), "README", b"no extension");
        write(tmp.path(), "logo.png", b"not really a png");

        let files = discover_files(tmp.path(), &filter(1024)).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["app.py", "src/main.rs"]);
        assert_eq!(files[1].name, "main.rs");
        assert_eq!(files[1].extension, "rs");
        assert_eq!(files[1].size_bytes, 12);
    }

    #[test]
    fn test_ignores_vendor_dirs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "node_modules/pkg/index.js", b"module.exports = 1;");
        write(tmp.path(), ".git/hooks/pre-commit.sh", b"exit 0");
        write(tmp.path(), "lib/index.js", b"export default 1;");

        let files = discover_files(tmp.path(), &filter(1024)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "lib/index.js");
    }

    #[test]
    fn test_skips_oversized_and_binary() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "big.rs", &vec![b'a'; 2048]);
        write(tmp.path(), "blob.rs", b"abc\0def");
        write(tmp.path(), "ok.rs", b"fn ok() {}");

        let files = discover_files(tmp.path(), &filter(1024)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "ok.rs");
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Build.SH", b"echo hi");
        let files = discover_files(tmp.path(), &filter(1024)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension, "sh");
    }

    #[test]
    fn test_missing_root() {
        let tmp = TempDir::new().unwrap();
        let result = discover_files(&tmp.path().join("nope"), &filter(1024));
        assert!(matches!(result, Err(VectorizeError::RepositoryUnavailable(_))));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let result = DiscoveryFilter::new(&["rs".to_string()], &["[".to_string()], 10);
        assert!(matches!(result, Err(VectorizeError::Validation(_))));
    }
}
