use thiserror::Error;

use crate::models::trip::TripStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("cannot {action} a trip that is {from}")]
    InvalidTransition {
        from: TripStatus,
        action: &'static str,
    },
    #[error("messaging gateway error: {0}")]
    Gateway(String),
}

impl AppError {
    /// Stable machine-readable code for callers rendering the error.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Other(_) => "internal",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Gateway(_) => "gateway",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_state_and_action() {
        let err = AppError::InvalidTransition {
            from: TripStatus::Scheduled,
            action: "finish",
        };
        assert_eq!(err.to_string(), "cannot finish a trip that is scheduled");
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn storage_errors_are_internal() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "internal");
    }
}
