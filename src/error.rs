use thiserror::Error;

/// Coarse classification of a failure, stable enough for callers to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate feedback tuple, duplicate identifier, or a class already
    /// held by another class teacher.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

impl FeedbackError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        FeedbackError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedbackError::Validation(_) => ErrorKind::Validation,
            FeedbackError::Conflict(_) => ErrorKind::Conflict,
            FeedbackError::NotFound { .. } => ErrorKind::NotFound,
            FeedbackError::Database(err) if is_unique_violation(err) => ErrorKind::Conflict,
            FeedbackError::Database(_)
            | FeedbackError::Csv(_)
            | FeedbackError::Io(_)
            | FeedbackError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Postgres SQLSTATE 23505.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
