use thiserror::Error;

/// Error kinds for a single agent run. All of them are terminal: the loop
/// never retries, the caller re-issues the request.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The input file is missing or unreadable.
    #[error("data access: {0}")]
    DataAccess(String),

    /// Input exists but cannot be interpreted: unparsable CSV, malformed
    /// notebook JSON, or an invalid cell index.
    #[error("format: {0}")]
    Format(String),

    /// The language-model call failed or returned output that does not match
    /// the decision schema.
    #[error("model: {0}")]
    Model(String),

    /// Persisting the notebook failed.
    #[error("write: {0}")]
    Write(String),
}
