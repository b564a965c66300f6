//! # Pipeline Error Types
//!
//! Structured error handling for the job pipeline using thiserror.
//!
//! Most of these never escape a single message's processing: the consumer
//! catches them at the message boundary, logs them and acknowledges the
//! delivery anyway. `Connection` and `Configuration` are the exceptions and
//! are fatal to the operation that raised them (startup, publisher setup).

use thiserror::Error;

/// Pipeline error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Envelope decode error: {message}")]
    Decode { message: String },

    #[error("Download failed: {url}: no artifact returned")]
    Download { url: String },

    #[error("Persistence error: {operation}: {message}")]
    Persistence { operation: String, message: String },

    #[error("Publish failed: {exchange}: {message}")]
    Publish { exchange: String, message: String },

    #[error("File access error: {path}: {message}")]
    FileAccess { path: String, message: String },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl PipelineError {
    /// Create a broker connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an envelope decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a download failure for the given source URL
    pub fn download(url: impl Into<String>) -> Self {
        Self::Download { url: url.into() }
    }

    /// Create a repository/database error
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Create a file access error
    pub fn file_access(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download { .. })
    }

    /// Short category label used in structured logs and the failure ledger
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Decode { .. } => "decode",
            Self::Download { .. } => "download",
            Self::Persistence { .. } => "persistence",
            Self::Publish { .. } => "publish",
            Self::FileAccess { .. } => "file_access",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::decode(err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::persistence("query", "No rows found"),
            sqlx::Error::Database(db_err) => {
                PipelineError::persistence("database", db_err.to_string())
            }
            sqlx::Error::PoolTimedOut => {
                PipelineError::persistence("pool", "Timed out acquiring a connection")
            }
            sqlx::Error::PoolClosed => PipelineError::persistence("pool", "Pool is closed"),
            other => PipelineError::persistence("sqlx", other.to_string()),
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::configuration(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let conn_err = PipelineError::connection("refused");
        assert!(matches!(conn_err, PipelineError::Connection { .. }));

        let download_err = PipelineError::download("https://example.test/a.json");
        assert!(download_err.is_download());
        assert_eq!(download_err.category(), "download");
    }

    #[test]
    fn test_error_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(err.is_decode());

        let err: PipelineError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, PipelineError::Persistence { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::persistence("update_status", "deadlock detected");
        let display = format!("{err}");
        assert!(display.contains("Persistence error"));
        assert!(display.contains("update_status"));
        assert!(display.contains("deadlock detected"));

        let err = PipelineError::file_access("/tmp/q.sql", "not found");
        assert_eq!(format!("{err}"), "File access error: /tmp/q.sql: not found");
    }
}
