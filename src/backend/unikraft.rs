use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::backend::{
    BackendError, ComputeBackend, CreateInstanceRequest, CreatedInstance, InstanceStatus,
};
use crate::error::{BoquitaError, Result};

/// Unikraft Cloud REST client.
#[derive(Debug, Clone)]
pub struct UnikraftBackend {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    image: &'a str,
    args: &'a [String],
    env: &'a std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_mb: Option<u32>,
    autostart: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiData {
    #[serde(default)]
    instances: Vec<ApiInstance>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiInstance {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<i64>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorEntry {
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiErrorEntry {
    fn describe(&self) -> String {
        match (&self.message, self.status) {
            (Some(message), Some(status)) => format!("{} (status {})", message, status),
            (Some(message), None) => message.clone(),
            (None, Some(status)) => format!("couldn't create instance, error status: {}", status),
            (None, None) => "unknown error".to_string(),
        }
    }
}

impl ApiInstance {
    fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error") || self.error.is_some()
    }

    fn error_message(&self) -> String {
        match (&self.message, self.error) {
            (Some(message), Some(code)) => format!("{} (error {})", message, code),
            (Some(message), None) => message.clone(),
            (None, Some(code)) => format!("instance error {}", code),
            (None, None) => "instance error".to_string(),
        }
    }
}

fn decode(body: &str) -> std::result::Result<ApiResponse, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))
}

fn first_instance(response: ApiResponse) -> std::result::Result<ApiInstance, BackendError> {
    let message = response.message.clone();
    response
        .data
        .and_then(|data| data.instances.into_iter().next())
        .ok_or_else(|| {
            BackendError::Decode(
                message.unwrap_or_else(|| "response carried no instance".to_string()),
            )
        })
}

fn parse_create(body: &str) -> std::result::Result<CreatedInstance, BackendError> {
    let response = decode(body)?;
    let mut errors: Vec<String> = response.errors.iter().map(ApiErrorEntry::describe).collect();
    let mut handle = None;

    if let Some(data) = &response.data {
        for instance in &data.instances {
            if instance.is_error() {
                errors.push(instance.error_message());
            } else if handle.is_none() {
                handle = instance.uuid.clone();
            }
        }
    }
    if handle.is_none() && errors.is_empty() && response.status.as_deref() == Some("error") {
        errors.push(
            response
                .message
                .unwrap_or_else(|| "create request failed".to_string()),
        );
    }

    Ok(CreatedInstance { handle, errors })
}

fn parse_get(body: &str) -> std::result::Result<InstanceStatus, BackendError> {
    let instance = first_instance(decode(body)?)?;
    let error = instance.is_error().then(|| instance.error_message());
    Ok(InstanceStatus {
        exit_code: instance.exit_code,
        stopped_at: instance.stopped_at,
        error,
    })
}

fn parse_delete(body: &str) -> std::result::Result<(), BackendError> {
    if body.trim().is_empty() {
        return Ok(());
    }
    let response = decode(body)?;
    let failures: Vec<String> = response
        .data
        .iter()
        .flat_map(|data| data.instances.iter())
        .filter(|instance| instance.is_error())
        .map(ApiInstance::error_message)
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(BackendError::Rejected(failures))
    }
}

impl UnikraftBackend {
    pub fn new(token: &str, metro: &str, api_base: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| BoquitaError::Validation(format!("invalid UKC token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let api_base = api_base
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://api.{}.kraft.cloud/v1", metro));

        Ok(Self { http, api_base })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn read(
        response: reqwest::Response,
    ) -> std::result::Result<String, BackendError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            let message = decode(&body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or(body);
            Err(BackendError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

#[async_trait]
impl ComputeBackend for UnikraftBackend {
    fn kind(&self) -> &'static str {
        "unikraft"
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> std::result::Result<CreatedInstance, BackendError> {
        let body = CreateBody {
            name: &request.name,
            image: &request.image,
            args: &request.args,
            env: &request.env,
            memory_mb: request.memory_mb,
            autostart: request.autostart,
        };
        let response = self
            .http
            .post(format!("{}/instances", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        parse_create(&Self::read(response).await?)
    }

    async fn get_instance(&self, handle: &str) -> std::result::Result<InstanceStatus, BackendError> {
        let response = self
            .http
            .get(format!("{}/instances/{}", self.api_base, handle))
            .send()
            .await
            .map_err(transport)?;
        parse_get(&Self::read(response).await?)
    }

    async fn delete_instance(&self, handle: &str) -> std::result::Result<(), BackendError> {
        let response = self
            .http
            .delete(format!("{}/instances/{}", self.api_base, handle))
            .send()
            .await
            .map_err(transport)?;
        parse_delete(&Self::read(response).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_api_base_uses_metro() {
        let backend = UnikraftBackend::new("tok", "fra0", None).unwrap();
        assert_eq!(backend.api_base(), "https://api.fra0.kraft.cloud/v1");

        let custom = UnikraftBackend::new("tok", "fra0", Some("http://localhost:9000/v1/")).unwrap();
        assert_eq!(custom.api_base(), "http://localhost:9000/v1");
    }

    #[test]
    fn create_success_yields_handle() {
        let body = r#"{"status":"success","data":{"instances":[
            {"status":"success","uuid":"77d0316a","name":"nginx-1"}]}}"#;
        let created = parse_create(body).unwrap();
        assert_eq!(created.handle.as_deref(), Some("77d0316a"));
        assert!(created.errors.is_empty());
    }

    #[test]
    fn create_collects_per_request_errors() {
        let body = r#"{"status":"error","data":{"instances":[
            {"status":"error","message":"image not found","error":8}]},
            "errors":[{"status":400,"message":"bad request"}]}"#;
        let created = parse_create(body).unwrap();
        assert!(created.handle.is_none());
        assert_eq!(
            created.errors,
            vec![
                "bad request (status 400)".to_string(),
                "image not found (error 8)".to_string()
            ]
        );
    }

    #[test]
    fn create_bare_error_status_is_reported() {
        let created = parse_create(r#"{"status":"error","message":"quota exceeded"}"#).unwrap();
        assert_eq!(created.errors, vec!["quota exceeded".to_string()]);
    }

    #[test]
    fn get_running_and_stopped() {
        let running = parse_get(
            r#"{"status":"success","data":{"instances":[{"status":"success","uuid":"a","state":"running"}]}}"#,
        )
        .unwrap();
        assert_eq!(running, InstanceStatus::running());

        let stopped = parse_get(
            r#"{"status":"success","data":{"instances":[{"status":"success","uuid":"a",
                "exit_code":3,"stopped_at":"2025-01-01T10:00:00Z"}]}}"#,
        )
        .unwrap();
        assert_eq!(stopped.exit_code, Some(3));
        assert!(stopped.stopped_at.is_some());
        assert!(stopped.error.is_none());
    }

    #[test]
    fn get_instance_error_is_surfaced() {
        let status = parse_get(
            r#"{"data":{"instances":[{"status":"error","message":"instance not found","error":2}]}}"#,
        )
        .unwrap();
        assert_eq!(status.error.as_deref(), Some("instance not found (error 2)"));
    }

    #[test]
    fn get_without_instances_is_decode_error() {
        assert!(matches!(
            parse_get(r#"{"status":"success","data":{"instances":[]}}"#),
            Err(BackendError::Decode(_))
        ));
        assert!(matches!(parse_get("not json"), Err(BackendError::Decode(_))));
    }

    #[test]
    fn delete_reports_item_failures() {
        assert!(parse_delete("").is_ok());
        assert!(parse_delete(r#"{"status":"success","data":{"instances":[{"status":"success"}]}}"#).is_ok());
        assert!(matches!(
            parse_delete(r#"{"data":{"instances":[{"status":"error","message":"busy"}]}}"#),
            Err(BackendError::Rejected(_))
        ));
    }
}
