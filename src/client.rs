use reqwest::Response;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::{CreateJobResponse, ErrorBody};
use crate::error::{BoquitaError, Result};
use crate::scheduler::job::{JobDetail, JobManifest, JobSummary};
use crate::worker::ObserverInfo;

/// HTTP client for a running Boquita server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(addr: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: addr.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v0/{}", self.base, path)
    }

    pub async fn create_job(&self, manifest: &JobManifest) -> Result<Uuid> {
        let response = self.http.post(self.url("jobs")).json(manifest).send().await?;
        let created: CreateJobResponse = Self::decode(response).await?;
        Ok(created.job_id)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let response = self.http.get(self.url("jobs")).send().await?;
        Self::decode(response).await
    }

    pub async fn get_job(&self, id: &str) -> Result<JobDetail> {
        let response = self.http.get(self.url(&format!("jobs/{}", id))).send().await?;
        Self::decode(response).await
    }

    pub async fn remove_trigger(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("jobs/{}/trigger", id)))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn list_observers(&self) -> Result<Vec<ObserverInfo>> {
        let response = self.http.get(self.url("observers")).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        Ok(Self::check(response).await?.json().await?)
    }

    /// Turn a non-2xx response into an `Api` error carrying the server's message.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body
                }
            });
        Err(BoquitaError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
