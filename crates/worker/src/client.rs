//! The worker-side HTTP client (spec §4.J): register, heartbeat, checkout,
//! status, complete, deregister. Grounded on the teacher's `HerokuClient`
//! (`crates/api/src/lib.rs`) — pre-built `reqwest::Client` with default
//! headers, a `base_url`, and a `request(method, path)` builder — generalized
//! from a bearer-token-keyed client into a worker-identity-keyed one that
//! injects `X-Worker-Key` instead of `Authorization: Bearer`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, Method, StatusCode};
use wfl_types::{
    Ack, Envelope, EnvelopeStatus, HeartbeatRequest, ProtocolKind, RegisterRequest, RegisterResponse, RuntimeCapabilities,
    TaskCompleteRequest, TaskStatusUpdate, WorkAssignment,
};

use crate::backoff::Backoff;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const WORKER_KEY_HEADER: &str = "X-Worker-Key";

/// TLS configuration for talking to the scheduler's HTTP API.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to a PEM-encoded custom CA bundle.
    pub custom_ca_path: Option<String>,
    /// Development-only escape hatch (spec §4.J "TLS").
    pub insecure_skip_verify: bool,
}

/// Configuration needed to build a [`WorkerClient`].
#[derive(Debug, Clone)]
pub struct WorkerClientConfig {
    pub base_url: String,
    pub worker_key: Option<String>,
    pub tls: TlsConfig,
}

/// A worker process's handle to the scheduler's HTTP API.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    http: Client,
    worker_key: Option<String>,
    backoff: Backoff,
}

impl WorkerClient {
    pub fn new(config: WorkerClientConfig) -> Result<Self, ProtocolKind> {
        let mut builder = Client::builder().timeout(CONTROL_TIMEOUT);

        if config.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_path) = &config.tls.custom_ca_path {
            let cert = load_ca_bundle(ca_path)?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build().map_err(|e| ProtocolKind::RequestFailed(e.to_string()))?;

        Ok(Self { base_url: config.base_url, http, worker_key: config.worker_key, backoff: Backoff::default() })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.worker_key {
            builder = builder.header(WORKER_KEY_HEADER, key);
        }
        builder
    }

    /// `POST /workers` — register this worker and receive its server-assigned
    /// ID (spec §4.J).
    pub async fn register(&self, name: &str, capabilities: RuntimeCapabilities) -> Result<String, ProtocolKind> {
        let body = RegisterRequest { name: name.to_string(), capabilities };
        let envelope: Envelope<RegisterResponse> = self.send_with_retry(Method::POST, "/workers", Some(&body)).await?;
        Ok(unwrap_data(envelope)?.worker_id)
    }

    /// `PUT /workers/{id}/heartbeat` — touch last-seen and refresh advertised
    /// capabilities.
    pub async fn heartbeat(&self, worker_id: &str, capabilities: RuntimeCapabilities) -> Result<(), ProtocolKind> {
        let body = HeartbeatRequest { capabilities };
        let envelope: Envelope<Ack> = self.send_with_retry(Method::PUT, &format!("/workers/{worker_id}/heartbeat"), Some(&body)).await?;
        unwrap_data(envelope)?;
        Ok(())
    }

    /// `GET /workers/{id}/work` — checkout one task, `Ok(None)` on a 204
    /// ("none available", spec §4.J).
    pub async fn checkout_work(&self, worker_id: &str) -> Result<Option<WorkAssignment>, ProtocolKind> {
        let response = self.request(Method::GET, &format!("/workers/{worker_id}/work")).send().await.map_err(|e| ProtocolKind::RequestFailed(e.to_string()))?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let envelope: Envelope<WorkAssignment> = response.json().await.map_err(|e| ProtocolKind::MalformedEnvelope(e.to_string()))?;
        Ok(Some(unwrap_data(envelope)?))
    }

    /// `PUT /workers/{id}/tasks/{tid}/status` — report an intermediate state
    /// transition.
    pub async fn report_status(&self, worker_id: &str, task_id: &str, update: TaskStatusUpdate) -> Result<(), ProtocolKind> {
        let path = format!("/workers/{worker_id}/tasks/{task_id}/status");
        let envelope: Envelope<Ack> = self.send_with_retry(Method::PUT, &path, Some(&update)).await?;
        unwrap_data(envelope)?;
        Ok(())
    }

    /// `PUT /workers/{id}/tasks/{tid}/complete` — report the final result.
    pub async fn complete(&self, worker_id: &str, task_id: &str, result: TaskCompleteRequest) -> Result<(), ProtocolKind> {
        let path = format!("/workers/{worker_id}/tasks/{task_id}/complete");
        let envelope: Envelope<Ack> = self.send_with_retry(Method::PUT, &path, Some(&result)).await?;
        unwrap_data(envelope)?;
        Ok(())
    }

    /// `DELETE /workers/{id}` — deregister.
    pub async fn deregister(&self, worker_id: &str) -> Result<(), ProtocolKind> {
        let envelope: Envelope<Ack> = self.send_with_retry::<(), _>(Method::DELETE, &format!("/workers/{worker_id}"), None).await?;
        unwrap_data(envelope)?;
        Ok(())
    }

    /// Sends a JSON request, retrying protocol failures (connection errors,
    /// non-2xx status, malformed envelopes) with exponential backoff up to
    /// `self.backoff.max_attempts()` (spec §7 "Protocol errors retry").
    async fn send_with_retry<B: serde::Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Envelope<T>, ProtocolKind> {
        let mut last_err = ProtocolKind::RequestFailed("no attempts made".to_string());
        for attempt in 0..self.backoff.max_attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.backoff.delay_for(attempt - 1)).await;
            }
            let mut builder = self.request(method.clone(), path);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            match builder.send().await {
                Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {
                    match response.json::<Envelope<T>>().await {
                        Ok(envelope) => return Ok(envelope),
                        Err(e) => last_err = ProtocolKind::MalformedEnvelope(e.to_string()),
                    }
                }
                Ok(response) => last_err = ProtocolKind::RequestFailed(format!("server returned {}", response.status())),
                Err(e) => last_err = ProtocolKind::RequestFailed(e.to_string()),
            }
        }
        Err(last_err)
    }
}

fn unwrap_data<T>(envelope: Envelope<T>) -> Result<T, ProtocolKind> {
    match envelope.status {
        EnvelopeStatus::Ok => envelope.data.ok_or_else(|| ProtocolKind::MalformedEnvelope("ok envelope missing data".to_string())),
        EnvelopeStatus::Error => {
            let message = envelope.error.map(|e| e.message).unwrap_or_else(|| "unknown protocol error".to_string());
            Err(ProtocolKind::RequestFailed(message))
        }
    }
}

fn load_ca_bundle(path: impl AsRef<Path>) -> Result<Certificate, ProtocolKind> {
    let bytes = fs::read(path.as_ref()).map_err(|e| ProtocolKind::RequestFailed(format!("reading CA bundle: {e}")))?;
    Certificate::from_pem(&bytes).map_err(|e| ProtocolKind::RequestFailed(format!("parsing CA bundle: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults_to_no_tls_overrides() {
        let config = TlsConfig::default();
        assert!(!config.insecure_skip_verify);
        assert!(config.custom_ca_path.is_none());
    }

    #[tokio::test]
    async fn client_builds_with_plain_http_base_url() {
        let config = WorkerClientConfig { base_url: "http://127.0.0.1:0".to_string(), worker_key: Some("secret".to_string()), tls: TlsConfig::default() };
        let client = WorkerClient::new(config);
        assert!(client.is_ok());
    }
}
