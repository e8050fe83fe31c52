use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("Access denied")]
    AccessDenied,
    #[error("{0} not found")]
    NotFound(String),
    #[error("Rate limit exceeded. Try again in {reset} seconds.")]
    RateLimited { limit: u64, reset: u64 },
    #[error("{0}")]
    AlreadyExists(String),
    #[error("Authentication Required")]
    AuthenticationRequired,
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Storage failure: {0}")]
    Store(String),
}

/// Failures reported by a document store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    Missing(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("All sessions closed for {0}")]
    Closed(String),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(what) => ChatError::NotFound(what),
            StoreError::Conflict(what) => {
                ChatError::AlreadyExists(format!("{what} already exists"))
            }
            StoreError::Unavailable(_) => ChatError::Store(err.to_string()),
        }
    }
}
