//! Wire types for the Worker Protocol (spec §4.J): the envelope every
//! response is wrapped in, and the request/response bodies for the six
//! endpoints a worker exchanges with the server.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// The envelope every worker HTTP response is wrapped in. Exactly one of
/// `data`/`error` is populated, matching the union described in spec §4.J.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: EnvelopeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub request_id: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// Runtime capabilities a worker advertises at registration and on every
/// heartbeat, used by checkout to filter which queued tasks it may receive.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeCapabilities {
    #[serde(default)]
    pub supports_docker: bool,
    #[serde(default)]
    pub supports_apptainer: bool,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub ram_mb: u64,
}

/// A registered worker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub capabilities: RuntimeCapabilities,
    #[serde(default)]
    pub current_task: Option<String>,
    pub last_heartbeat: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub capabilities: RuntimeCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub capabilities: RuntimeCapabilities,
}

/// Body returned by `GET /workers/{id}/work`. Absent (204) when no task is
/// available for this worker's capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub state: crate::task::TaskState,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub exit_code: i32,
    #[serde(default)]
    pub outputs: IndexMap<String, crate::value::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_serializes_with_data_and_no_error() {
        let envelope = Envelope {
            status: EnvelopeStatus::Ok,
            data: Some(RegisterResponse { worker_id: "w1".into() }),
            error: None,
            request_id: "req-1".into(),
            timestamp: "2026-07-28T00:00:00Z".into(),
            pagination: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("error").is_none());
        assert_eq!(json["data"]["worker_id"], "w1");
    }

    #[test]
    fn error_envelope_omits_data_field() {
        let envelope: Envelope<RegisterResponse> = Envelope {
            status: EnvelopeStatus::Error,
            data: None,
            error: Some(ErrorBody { kind: "protocol".into(), message: "no such worker".into() }),
            request_id: "req-2".into(),
            timestamp: "2026-07-28T00:00:01Z".into(),
            pagination: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("data").is_none());
        assert_eq!(json["error"]["kind"], "protocol");
    }
}
