use thiserror::Error;

/// Failures surfaced to the controller. Each variant ends up as a single
/// user-visible notification; nothing is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("geolocation error: {0}")]
    Geolocation(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn storage(err: anyhow::Error) -> Self {
        AppError::Storage(format!("{err:#}"))
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
