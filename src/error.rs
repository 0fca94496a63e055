use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Video not found")]
    VideoNotFound,

    #[error("Video channel not found")]
    ChannelNotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid request body: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid torrent: {0}")]
    Torrent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Outbox event not found: {0}")]
    EventNotFound(uuid::Uuid),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Serialization failures and deadlocks can succeed when the whole
    /// transaction is run again.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(DieselError::DatabaseError(kind, info)) => {
                matches!(kind, DatabaseErrorKind::SerializationFailure)
                    || info.message().contains("deadlock detected")
                    || info.message().contains("could not serialize access")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn serialization_failure() -> AppError {
    AppError::Database(DieselError::DatabaseError(
        DatabaseErrorKind::SerializationFailure,
        Box::new("could not serialize access due to concurrent update".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failures_are_transient() {
        assert!(serialization_failure().is_transient());
        assert!(!AppError::VideoNotFound.is_transient());
        assert!(!AppError::Database(DieselError::NotFound).is_transient());
    }

    #[test]
    fn deadlocks_are_transient() {
        let err = AppError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("deadlock detected".to_string()),
        ));
        assert!(err.is_transient());
    }
}
