//! Job progress reporting for CLI commands that wait on a job.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::models::{Job, PipelineStep};

/// Reports job snapshots. Implementations write to stderr (human or JSON).
pub trait JobProgressReporter: Send + Sync {
    fn report(&self, job: &Job);
}

/// Human-friendly progress:
/// `vectorize widgets  processing_files  12 / 40 files  118 chunks`.
pub struct StderrProgress;

impl JobProgressReporter for StderrProgress {
    fn report(&self, job: &Job) {
        let p = &job.progress;
        let step = p.step.map(PipelineStep::as_str).unwrap_or("pending");
        let detail = match p.step {
            Some(PipelineStep::ProcessingFiles) => format!(
                "{} / {} files  {} chunks",
                format_number(p.files_processed),
                format_number(p.files_discovered),
                format_number(p.chunks_created)
            ),
            Some(PipelineStep::GeneratingEmbeddings) => format!(
                "{} / {} chunks embedded",
                format_number(p.chunks_with_embeddings),
                format_number(p.chunks_created)
            ),
            Some(PipelineStep::SavingChunks) | Some(PipelineStep::Completed) => format!(
                "{} / {} chunks saved",
                format_number(p.chunks_saved),
                format_number(p.chunks_with_embeddings)
            ),
            Some(PipelineStep::DiscoveringFiles) => "discovering...".to_string(),
            _ => String::new(),
        };
        let line = format!("vectorize {}  {}  {}\n", job.repo_name, step, detail);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JobProgressReporter for JsonProgress {
    fn report(&self, job: &Job) {
        let obj = serde_json::json!({
            "event": "progress",
            "job_id": job.id,
            "status": job.status,
            "progress": job.progress,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl JobProgressReporter for NoProgress {
    fn report(&self, _job: &Job) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn JobProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_progress_mode() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
