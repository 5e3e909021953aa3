//! Remote compute backends that provision isolated run instances.
//!
//! The lifecycle engine only talks to a backend through [`ComputeBackend`]:
//!
//! - [`ComputeBackend::create_instance`] provisions and starts an instance
//! - [`ComputeBackend::get_instance`] reports whether it stopped and how
//! - [`ComputeBackend::delete_instance`] releases it
//!
//! Two implementations ship with the crate: [`UnikraftBackend`] for Unikraft
//! Cloud and [`DockerBackend`] for local development. Exactly one is active per
//! process, selected through [`BackendConfig`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::BackendConfig;
use crate::error::Result;

pub mod docker;
pub mod unikraft;

pub use docker::DockerBackend;
pub use unikraft::UnikraftBackend;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("instance request rejected: {}", .0.join("; "))]
    Rejected(Vec<String>),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("backend command failed: {0}")]
    Command(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Command(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::Rejected(_) | BackendError::Decode(_) => false,
        }
    }
}

/// Everything needed to provision one run instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub image: String,
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub memory_mb: Option<u32>,
    pub autostart: bool,
}

/// Result of a create call: the instance handle plus any per-request errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatedInstance {
    pub handle: Option<String>,
    pub errors: Vec<String>,
}

impl CreatedInstance {
    pub fn created(handle: impl Into<String>) -> Self {
        Self {
            handle: Some(handle.into()),
            errors: Vec::new(),
        }
    }

    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            handle: None,
            errors,
        }
    }

    /// The handle when the backend reported no errors.
    pub fn into_handle(self) -> std::result::Result<String, BackendError> {
        match self.handle {
            Some(handle) if self.errors.is_empty() => Ok(handle),
            Some(_) => Err(BackendError::Rejected(self.errors)),
            None if self.errors.is_empty() => Err(BackendError::Decode(
                "create response carried neither a handle nor errors".to_string(),
            )),
            None => Err(BackendError::Rejected(self.errors)),
        }
    }
}

/// Point-in-time view of an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceStatus {
    pub exit_code: Option<i32>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Instance-level error reported by the backend
    pub error: Option<String>,
}

impl InstanceStatus {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn stopped(exit_code: i32, stopped_at: DateTime<Utc>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stopped_at: Some(stopped_at),
            error: None,
        }
    }
}

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Short backend name for logs
    fn kind(&self) -> &'static str;

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> std::result::Result<CreatedInstance, BackendError>;

    async fn get_instance(&self, handle: &str) -> std::result::Result<InstanceStatus, BackendError>;

    async fn delete_instance(&self, handle: &str) -> std::result::Result<(), BackendError>;
}

/// Build the backend selected by `config`.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ComputeBackend>> {
    let backend: Arc<dyn ComputeBackend> = match config {
        BackendConfig::Unikraft {
            token,
            metro,
            api_base,
        } => Arc::new(UnikraftBackend::new(token, metro, api_base.as_deref())?),
        BackendConfig::Docker { binary } => Arc::new(DockerBackend::new(binary.clone())),
    };
    tracing::info!(backend = backend.kind(), "Compute backend configured");
    Ok(backend)
}
