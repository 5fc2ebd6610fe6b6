use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for request headers the client did not send.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder for best-effort fields that could not be determined.
pub const UNKNOWN: &str = "unknown";

/// Point-in-time record of one request plus host/process telemetry.
///
/// Built at most once per request and shared behind an `Arc`; never mutated
/// after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub payload: SnapshotPayload,
    pub request_created_at: String,
}

impl MetadataSnapshot {
    pub fn new(data: SnapshotData, created_at: DateTime<Utc>) -> Self {
        Self {
            payload: SnapshotPayload { data },
            request_created_at: created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn data(&self) -> &SnapshotData {
        &self.payload.data
    }

    pub fn client_ip(&self) -> &str {
        &self.payload.data.client_information.ip
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub data: SnapshotData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub agent_id: String,
    pub agent_name: String,
    pub client_information: ClientInformation,
    pub http_request: HttpRequestInfo,
    pub runtime_information: RuntimeInformation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInformation {
    pub ip: String,
    pub device_type: String,
    pub platform: String,
    pub browser: String,
    pub browser_version: String,
    pub network_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestInfo {
    pub method: String,
    pub url: String,
    pub host: String,
    pub headers: RequestHeaders,
    /// Decoded body text; `None` for empty and multipart bodies.
    pub body: Option<String>,
    pub query_parameters: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaders {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "content-type")]
    pub content_type: String,

    #[serde(rename = "content-length")]
    pub content_length: u64,

    pub referrer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub file_size: u64,
    /// Base64 (standard alphabet) of the raw file bytes.
    pub file_content: String,
    pub file_type: String,
    /// Lowercase hex SHA-256 of the raw file bytes.
    pub file_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInformation {
    pub ip_address: String,
    pub pid: u32,
    pub run_as: String,
    pub executable_path: String,
    pub executable_name: String,
    /// Rust toolchain version the agent was built with.
    pub executable_version: String,
    pub process_name: String,
    pub process_path: String,
    pub process_command: Vec<String>,
    pub platform: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub architecture: String,
    pub os_name: String,
    pub os_version: String,
    pub os_build: String,
}
