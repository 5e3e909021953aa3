use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{BoquitaError, Result};

/// Polling and retry behaviour of per-execution observers.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Interval between two status queries against the backend
    pub poll_interval: Duration,
    /// Additional attempts after the first failed backend call
    pub max_retries: u32,
    /// Fixed sleep between two attempts
    pub retry_backoff: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Which compute backend provisions run instances.
///
/// Only one backend is active per process.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Unikraft Cloud REST API
    Unikraft {
        token: String,
        metro: String,
        /// Overrides `https://api.<metro>.kraft.cloud/v1`
        api_base: Option<String>,
    },
    /// Local containers through the docker CLI
    Docker { binary: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Docker {
            binary: "docker".to_string(),
        }
    }
}

impl BackendConfig {
    /// Build a Unikraft configuration, failing when credentials are missing.
    pub fn unikraft(token: Option<String>, metro: Option<String>) -> Result<Self> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BoquitaError::Validation("UKC_TOKEN missing".to_string()))?;
        let metro = metro
            .filter(|m| !m.is_empty())
            .ok_or_else(|| BoquitaError::Validation("UKC_METRO missing".to_string()))?;
        Ok(BackendConfig::Unikraft {
            token,
            metro,
            api_base: None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Unikraft { .. } => "unikraft",
            BackendConfig::Docker { .. } => "docker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    /// Capacity of the work queue between controller and executor
    pub queue_capacity: usize,
    /// Tick of the executor dispatch loop
    pub dispatch_interval: Duration,
    /// Page size used by ListJobs
    pub list_page_size: usize,
    /// Upper bound on concurrently running observers, `None` for no cap
    pub max_observers: Option<usize>,
    pub observer: ObserverConfig,
    pub backend: BackendConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:3333"
                .parse()
                .expect("default listen address is valid"),
            queue_capacity: 100,
            dispatch_interval: Duration::from_millis(250),
            list_page_size: 100,
            max_observers: None,
            observer: ObserverConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr, backend: BackendConfig) -> Self {
        Self {
            listen_addr,
            backend,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_observers(mut self, max: usize) -> Self {
        self.max_observers = Some(max);
        self
    }

    pub fn with_observer(mut self, observer: ObserverConfig) -> Self {
        self.observer = observer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(BoquitaError::Validation(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.list_page_size == 0 {
            return Err(BoquitaError::Validation(
                "list page size must be at least 1".to_string(),
            ));
        }
        if self.max_observers == Some(0) {
            return Err(BoquitaError::Validation(
                "max observers must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve a listen host (IP literal, bracket-less IPv6, or hostname) and port.
pub async fn resolve_listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| BoquitaError::Validation(format!("host {:?} did not resolve", host)))
}
