//! Error taxonomy for the vectorization core.
//!
//! Library operations return [`VectorizeError`]. Application glue (config
//! loading, CLI, server bootstrap) keeps using `anyhow`, converting at the
//! boundary.

/// Errors surfaced by the pipeline, store, embedding adapter, and search engine.
#[derive(Debug, thiserror::Error)]
pub enum VectorizeError {
    /// Malformed input, rejected before any work is scheduled.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The repository could not be cloned or fetched.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// The embedding provider could not produce embeddings.
    #[error("embeddings unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A text exceeds the provider's input budget.
    #[error("payload too large: {tokens} tokens exceeds limit of {limit}")]
    PayloadTooLarge { tokens: usize, limit: usize },

    /// Namespace provisioning or persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unknown job id, repository, or namespace.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<sqlx::Error> for VectorizeError {
    fn from(err: sqlx::Error) -> Self {
        VectorizeError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for VectorizeError {
    fn from(err: std::io::Error) -> Self {
        VectorizeError::Storage(err.to_string())
    }
}

impl VectorizeError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VectorizeError::Validation(_) => "bad_request",
            VectorizeError::RepositoryUnavailable(_) => "repository_unavailable",
            VectorizeError::EmbeddingUnavailable(_) => "embedding_unavailable",
            VectorizeError::PayloadTooLarge { .. } => "payload_too_large",
            VectorizeError::Storage(_) => "storage",
            VectorizeError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias using [`VectorizeError`].
pub type Result<T> = std::result::Result<T, VectorizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = VectorizeError::NotFound("job abc".to_string());
        assert_eq!(err.to_string(), "job abc not found");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_payload_message_names_limit() {
        let err = VectorizeError::PayloadTooLarge {
            tokens: 9000,
            limit: 8191,
        };
        assert!(err.to_string().contains("8191"));
    }
}
