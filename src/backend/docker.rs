use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;

use crate::backend::{
    BackendError, ComputeBackend, CreateInstanceRequest, CreatedInstance, InstanceStatus,
};

const MANAGED_LABEL: &str = "boquita.managed=true";

/// Runs instances as detached containers through the docker CLI.
///
/// Containers are started with `--security-opt=no-new-privileges` and labelled
/// so leaked instances can be found with `docker ps --filter label=boquita.managed`.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    binary: String,
}

/// Subset of `docker inspect --format '{{json .State}}'`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: String,
    #[serde(default)]
    finished_at: Option<String>,
}

impl DockerBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `docker run`.
    pub fn run_args(request: &CreateInstanceRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            format!("--name={}", request.name),
            format!("--label={}", MANAGED_LABEL),
            "--security-opt=no-new-privileges".to_string(),
        ];

        if let Some(memory_mb) = request.memory_mb {
            args.push(format!("--memory={}m", memory_mb));
        }

        if let Some(ref entrypoint) = request.entrypoint {
            args.push(format!("--entrypoint={}", entrypoint));
        }

        for (key, value) in &request.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(request.image.clone());
        args.extend(request.args.iter().cloned());
        args
    }

    async fn docker(&self, args: &[String]) -> Result<std::process::Output, BackendError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BackendError::Command(format!("{}: {}", self.binary, e)))
    }

    fn stderr_of(output: &std::process::Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            format!("exit code: {:?}", output.status.code())
        } else {
            stderr
        }
    }
}

fn parse_finished_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    // docker reports the zero time for containers that never finished
    if raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Map a container state document onto an instance status.
pub fn parse_container_state(raw: &str) -> Result<InstanceStatus, BackendError> {
    let state: ContainerState =
        serde_json::from_str(raw.trim()).map_err(|e| BackendError::Decode(e.to_string()))?;

    let stopped = !state.running && matches!(state.status.as_str(), "exited" | "dead");
    let stopped_at = if stopped {
        parse_finished_at(state.finished_at.as_deref()).or_else(|| Some(Utc::now()))
    } else {
        None
    };

    Ok(InstanceStatus {
        exit_code: stopped.then_some(state.exit_code),
        stopped_at,
        error: (!state.error.is_empty()).then_some(state.error),
    })
}

#[async_trait]
impl ComputeBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreatedInstance, BackendError> {
        tracing::debug!(name = %request.name, image = %request.image, "Starting container");
        let output = self.docker(&Self::run_args(request)).await?;

        if !output.status.success() {
            return Ok(CreatedInstance::rejected(vec![Self::stderr_of(&output)]));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(BackendError::Decode(
                "docker run printed no container id".to_string(),
            ));
        }
        Ok(CreatedInstance::created(container_id))
    }

    async fn get_instance(&self, handle: &str) -> Result<InstanceStatus, BackendError> {
        let args = vec![
            "inspect".to_string(),
            "--format={{json .State}}".to_string(),
            handle.to_string(),
        ];
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(BackendError::Command(Self::stderr_of(&output)));
        }
        parse_container_state(&String::from_utf8_lossy(&output.stdout))
    }

    async fn delete_instance(&self, handle: &str) -> Result<(), BackendError> {
        let args = vec!["rm".to_string(), "--force".to_string(), handle.to_string()];
        let output = self.docker(&args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BackendError::Command(Self::stderr_of(&output)))
        }
    }
}
