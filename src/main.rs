//! # Code Vectorizer CLI (`cvec`)
//!
//! ## Usage
//!
//! ```bash
//! cvec --config ./config/cvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvec init` | Create the SQLite database |
//! | `cvec serve` | Start the HTTP API |
//! | `cvec vectorize <url> --username <u>` | Ingest a repository and wait for the job |
//! | `cvec search "<query>" --username <u>` | Search a user's repositories |
//! | `cvec files <pattern> --username <u>` | Chunks of files whose path contains a pattern |
//! | `cvec repos <username>` | List a user's repositories |
//! | `cvec stats <username> <repo>` | Files and sizes per extension |
//! | `cvec delete <username> <repo>` | Delete a repository |
//!
//! Logs go to stderr (filter with `RUST_LOG`); results go to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use code_vectorizer::config::{load_config, Config};
use code_vectorizer::models::JobStatus;
use code_vectorizer::progress::ProgressMode;
use code_vectorizer::search::{PathSearchRequest, SearchRequest};
use code_vectorizer::server::run_server;
use code_vectorizer::service::{VectorizeRequest, VectorizerService};

/// Poll interval while waiting on a job.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Code Vectorizer: ingest source repositories into per-user vector
/// namespaces and search them by meaning.
#[derive(Parser)]
#[command(name = "cvec", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cvec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file. Namespaces are created on demand.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Clone, chunk, embed and store a repository, waiting for completion.
    Vectorize {
        /// Repository URL. Accepted schemes come from `[git].allowed_schemes`.
        url: String,

        #[arg(long)]
        username: String,

        /// Defaults to the last path segment of the URL without `.git`.
        #[arg(long)]
        repo_name: Option<String>,

        /// Access token injected into https clone URLs.
        #[arg(long)]
        token: Option<String>,

        /// Maximum tokens per chunk.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Tokens shared between consecutive chunks.
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Skip files larger than this many bytes.
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Progress on stderr: off, human, or json. Default: human when
        /// stderr is a TTY, otherwise off.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search a user's repositories.
    Search {
        query: String,

        #[arg(long)]
        username: String,

        /// Restrict to one repository.
        #[arg(long)]
        repo: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity in [-1, 1].
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Show chunks of files whose path contains a substring (case-insensitive).
    Files {
        pattern: String,

        #[arg(long)]
        username: String,

        /// Restrict to one repository.
        #[arg(long)]
        repo: Option<String>,

        /// Default: 20.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List a user's repositories.
    Repos { username: String },

    /// File counts and sizes per extension for one repository.
    Stats { username: String, repo: String },

    /// Delete a repository and everything stored for it.
    Delete { username: String, repo: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Serve => {
            let service = VectorizerService::from_config(config).await?;
            run_server(Arc::new(service)).await
        }
        Commands::Vectorize {
            url,
            username,
            repo_name,
            token,
            chunk_size,
            chunk_overlap,
            max_file_size,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(s) => ProgressMode::parse(s).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: {}. Use off, human, or json.", s)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            let request = VectorizeRequest {
                repo_url: url,
                username,
                repo_name,
                auth_token: token,
                chunk_size,
                chunk_overlap,
                max_file_size,
            };
            let service = VectorizerService::from_config(config).await?;
            run_vectorize(&service, request, mode).await
        }
        Commands::Search {
            query,
            username,
            repo,
            limit,
            threshold,
        } => {
            let service = VectorizerService::from_config(config).await?;
            let request = SearchRequest {
                query,
                username,
                repo_name: repo,
                limit,
                similarity_threshold: threshold,
            };
            run_search(&service, &request).await
        }
        Commands::Files {
            pattern,
            username,
            repo,
            limit,
        } => {
            let service = VectorizerService::from_config(config).await?;
            let request = PathSearchRequest {
                pattern,
                username,
                repo_name: repo,
                limit,
            };
            run_files(&service, &request).await
        }
        Commands::Stats { username, repo } => {
            let service = VectorizerService::from_config(config).await?;
            run_stats(&service, &username, &repo).await
        }
        Commands::Repos { username } => {
            let service = VectorizerService::from_config(config).await?;
            run_repos(&service, &username).await
        }
        Commands::Delete { username, repo } => {
            let service = VectorizerService::from_config(config).await?;
            service.delete_repository(&username, &repo).await?;
            println!("deleted {}/{}", username, repo);
            Ok(())
        }
    }
}

async fn run_init(config: &Config) -> Result<()> {
    match config.db.backend.as_str() {
        "sqlite" => {
            let pool = code_vectorizer::db::connect(&config.db).await?;
            pool.close().await;
            println!("Database initialized at {}", config.db.path.display());
        }
        _ => println!("Backend '{}' needs no initialization.", config.db.backend),
    }
    Ok(())
}

async fn run_vectorize(
    service: &VectorizerService,
    request: VectorizeRequest,
    mode: ProgressMode,
) -> Result<()> {
    let accepted = service.start_vectorization(request)?;
    let reporter = mode.reporter();

    let mut last_progress = None;
    let job = loop {
        let job = service
            .job_status(&accepted.job_id)
            .with_context(|| format!("Lost track of job {}", accepted.job_id))?;
        if last_progress.as_ref() != Some(&job.progress) {
            reporter.report(&job);
            last_progress = Some(job.progress.clone());
        }
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    let p = &job.progress;
    println!("vectorize {}/{}", job.username, job.repo_name);
    println!("  job: {}", job.id);
    println!(
        "  files: {} discovered, {} processed, {} skipped",
        p.files_discovered, p.files_processed, p.files_skipped
    );
    println!(
        "  chunks: {} created, {} embedded, {} saved, {} skipped",
        p.chunks_created, p.chunks_with_embeddings, p.chunks_saved, p.chunks_skipped
    );

    match job.status {
        JobStatus::Completed => {
            println!("ok");
            Ok(())
        }
        _ => bail!(
            "Job failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn run_search(service: &VectorizerService, request: &SearchRequest) -> Result<()> {
    let response = service.search(request).await?;
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}:{}  lines {}-{}",
            i + 1,
            r.similarity,
            r.repo_name,
            r.file_path,
            r.start_line,
            r.end_line
        );
        for line in r.content.lines().take(3) {
            println!("    {}", line);
        }
        println!();
    }
    println!(
        "{} of {} matches shown",
        response.results.len(),
        response.total
    );
    Ok(())
}

async fn run_repos(service: &VectorizerService, username: &str) -> Result<()> {
    let repos = service.list_repositories(username).await?;
    if repos.is_empty() {
        println!("No repositories for {}.", username);
        return Ok(());
    }

    println!(
        "{:<30} {:<12} {:>8} {:>8}  URL",
        "REPOSITORY", "STATUS", "FILES", "CHUNKS"
    );
    for r in repos {
        println!(
            "{:<30} {:<12} {:>8} {:>8}  {}",
            r.repo_name,
            r.status.as_str(),
            r.file_count,
            r.chunk_count,
            r.repo_url
        );
    }
    Ok(())
}

async fn run_files(service: &VectorizerService, request: &PathSearchRequest) -> Result<()> {
    let response = service.search_by_path(request).await?;
    if response.results.is_empty() {
        println!("No files matching '{}'.", response.pattern);
        return Ok(());
    }

    for m in &response.results {
        println!(
            "{}:{}  lines {}-{} ({} tokens)",
            m.repo_name, m.file_path, m.start_line, m.end_line, m.token_count
        );
        for line in m.content.lines().take(3) {
            println!("    {}", line);
        }
        println!();
    }
    println!("{} chunks shown", response.results.len());
    Ok(())
}

async fn run_stats(service: &VectorizerService, username: &str, repo: &str) -> Result<()> {
    let stats = service.repository_stats(username, repo).await?;

    println!("{} ({})", stats.repo_name, stats.status.as_str());
    println!("  url: {}", stats.repo_url);
    println!("  namespace: {}", stats.namespace);
    println!(
        "  updated: {}",
        stats.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("{:<12} {:>8} {:>12}", "EXTENSION", "FILES", "SIZE (KB)");
    for ext in &stats.extensions {
        let label = if ext.extension.is_empty() {
            "(none)"
        } else {
            ext.extension.as_str()
        };
        println!(
            "{:<12} {:>8} {:>12.1}",
            label,
            ext.file_count,
            ext.total_size_bytes as f64 / 1024.0
        );
    }
    println!(
        "{:<12} {:>8} {:>12.1}",
        "total",
        stats.file_count,
        stats.total_size_bytes as f64 / 1024.0
    );
    println!("chunks: {}", stats.chunk_count);
    Ok(())
}
