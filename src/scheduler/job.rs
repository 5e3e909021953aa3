use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::InstanceStatus;
use crate::error::{BoquitaError, Result};
use crate::store::Entity;

pub const MANIFEST_VERSION_V1: &str = "job.manifest/v1";

/// When a job reaches the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Dispatch once, immediately
    #[default]
    None,
    /// Recurring 5-field cron expression
    Cron(String),
    /// One-shot RFC 3339 instant or cron expression (next occurrence only)
    Schedule(String),
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::None => "none",
            Trigger::Cron(_) => "cron",
            Trigger::Schedule(_) => "schedule",
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Trigger::None => None,
            Trigger::Cron(expr) | Trigger::Schedule(expr) => Some(expr),
        }
    }
}

fn default_version() -> String {
    MANIFEST_VERSION_V1.to_string()
}

/// Immutable description of what to run and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub trigger: Trigger,
}

impl JobManifest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            name: None,
            image: image.into(),
            entrypoint: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            memory_mb: None,
            trigger: Trigger::None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    /// Structural checks. Trigger expressions are validated by the trigger scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION_V1 {
            return Err(BoquitaError::Validation(format!(
                "unsupported manifest version {:?}, expected {:?}",
                self.version, MANIFEST_VERSION_V1
            )));
        }
        if self.image.trim().is_empty() {
            return Err(BoquitaError::Validation("image must not be empty".to_string()));
        }
        if self.memory_mb == Some(0) {
            return Err(BoquitaError::Validation(
                "memory_mb must be greater than zero".to_string(),
            ));
        }
        if let Some(expr) = self.trigger.expression() {
            if expr.trim().is_empty() {
                return Err(BoquitaError::Validation(format!(
                    "{} trigger needs an expression",
                    self.trigger.kind()
                )));
            }
        }
        Ok(())
    }

    /// Name used for instance naming: explicit name or the image repository basename.
    pub fn job_name(&self) -> String {
        let raw = match &self.name {
            Some(name) if !name.trim().is_empty() => name.as_str(),
            _ => {
                let without_digest = self.image.split('@').next().unwrap_or_default();
                let repo = without_digest.rsplit('/').next().unwrap_or_default();
                repo.split(':').next().unwrap_or_default()
            }
        };
        sanitize_name(raw)
    }

    /// Parse a manifest from YAML (or JSON, which is valid YAML).
    ///
    /// The document goes through a JSON value so triggers use the same
    /// `cron: <expr>` map shape in both formats.
    /// Numbers and booleans under `env` and `args` are read as their string
    /// form, so `PORT: 8080` loads like `PORT: "8080"`.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mut document: serde_json::Value =
            serde_yaml::from_str(raw).map_err(|e| BoquitaError::Manifest(e.to_string()))?;
        stringify_scalars(&mut document);
        serde_json::from_value(document).map_err(|e| BoquitaError::Manifest(e.to_string()))
    }

    /// Load a manifest file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&raw).map_err(|e| BoquitaError::Manifest(e.to_string()))
        } else {
            Self::from_yaml_str(&raw)
        }
    }
}

fn stringify_scalars(document: &mut serde_json::Value) {
    fn coerce(value: &mut serde_json::Value) {
        let text = match value {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => return,
        };
        *value = serde_json::Value::String(text);
    }

    if let Some(env) = document.get_mut("env").and_then(|v| v.as_object_mut()) {
        env.values_mut().for_each(coerce);
    }
    if let Some(args) = document.get_mut("args").and_then(|v| v.as_array_mut()) {
        args.iter_mut().for_each(coerce);
    }
}

/// Lowercase alphanumerics and dashes only, never empty.
fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A submitted unit of work. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub manifest: JobManifest,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: Uuid, manifest: JobManifest) -> Self {
        Self {
            id,
            name: manifest.job_name(),
            manifest,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Job {
    const KIND: &'static str = "Job";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Exit code recorded when an instance stopped without reporting one.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// One dispatch of a job, tracked until a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Backend handle of the run instance
    pub instance: String,
    pub instance_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    /// Log capture is not implemented; always empty.
    pub logs: Vec<String>,
}

impl Execution {
    pub fn running(id: Uuid, job_id: Uuid, instance: String, instance_name: String) -> Self {
        Self {
            id,
            job_id,
            instance,
            instance_name,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            exit_code: None,
            logs: Vec::new(),
        }
    }

    /// Fold a backend status report into this execution.
    ///
    /// Transitions are monotonic: once terminal, reports are ignored.
    pub fn apply(&mut self, report: &InstanceStatus) -> ExecutionStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        let Some(stopped_at) = report.stopped_at else {
            return self.status;
        };

        let exit_code = report.exit_code.unwrap_or(UNKNOWN_EXIT_CODE);
        self.status = if exit_code == 0 {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        self.exit_code = Some(exit_code);
        self.finished_at = Some(stopped_at);
        self.status
    }
}

impl Entity for Execution {
    const KIND: &'static str = "Execution";
}

/// Link between a job and its scheduler registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRegistration {
    pub job_id: Uuid,
    pub handle: Uuid,
    pub trigger: Trigger,
    pub registered_at: DateTime<Utc>,
}

impl Entity for TriggerRegistration {
    const KIND: &'static str = "TriggerRegistration";
}

/// Job as returned by ListJobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub job: Job,
    pub last_execution: Option<Execution>,
}

/// Job as returned by GetById, executions newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub last_execution: Option<Execution>,
    pub executions: Vec<Execution>,
}
