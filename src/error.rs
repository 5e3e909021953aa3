use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum BoquitaError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue operation cancelled")]
    QueueCancelled,

    #[error("Queue closed")]
    QueueClosed,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("Observer already running for execution {0}")]
    DuplicateObserver(Uuid),

    #[error("Observer limit of {0} reached")]
    ObserverLimit(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoquitaError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        BoquitaError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BoquitaError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, BoquitaError>;
