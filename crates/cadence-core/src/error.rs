use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Notification channel error: {0}")]
    Channel(String),

    #[error("Ambiguous short ID. Did you mean one of these?")]
    AmbiguousId(Vec<(String, String)>), // Vec of (ID, Title)
}

impl CoreError {
    /// Whether a caller may reasonably retry the operation that produced this error.
    ///
    /// Validation, not-found and conflict errors are permanent; everything that
    /// stems from I/O against a collaborator is treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Transient(_) | CoreError::Timeout(_) | CoreError::Channel(_) | CoreError::Io(_) => true,
            CoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Maps a unique-constraint violation to [`CoreError::Conflict`], leaving other errors untouched.
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return CoreError::Conflict(what.to_string());
            }
        }
        CoreError::Database(err)
    }
}

/// Runs an outbound call under a bounded timeout.
///
/// An elapsed timer becomes [`CoreError::Timeout`], which is retryable.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout(limit)),
    }
}
