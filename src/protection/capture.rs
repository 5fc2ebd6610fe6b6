use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use http::{header, HeaderMap, Method, Uri};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::error::{AgentError, AgentResult};
use crate::models::metadata::{
    ClientInformation, HttpRequestInfo, MetadataSnapshot, RequestHeaders, SnapshotData,
    UploadedFile, NOT_AVAILABLE, UNKNOWN,
};
use crate::protection::telemetry::HostTelemetry;
use crate::protection::user_agent;

/// The parts of an inbound request that capture reads.
///
/// The body is the buffered copy; the handler receives its own clone of the
/// same bytes. When `body_complete` is false the body was too large (or the
/// stream failed) and the handler kept the original stream, so capture
/// records neither a body nor files.
#[derive(Debug, Clone)]
pub struct RequestSource {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub body_complete: bool,
    pub client_ip: String,
}

impl RequestSource {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn header_or_na(&self, name: &str) -> String {
        self.header(name).unwrap_or(NOT_AVAILABLE).to_string()
    }

    fn host(&self) -> String {
        self.header(header::HOST.as_str())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.to_string()))
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

/// Builds [`MetadataSnapshot`]s for this agent.
pub struct MetadataCapture {
    agent_id: String,
    agent_name: String,
    telemetry: Arc<dyn HostTelemetry>,
}

impl MetadataCapture {
    pub fn new(agent_id: String, agent_name: String, telemetry: Arc<dyn HostTelemetry>) -> Self {
        Self {
            agent_id,
            agent_name,
            telemetry,
        }
    }

    /// Capture a snapshot of `source`. Errors are logged and yield `None`.
    pub async fn capture(&self, source: &RequestSource) -> Option<MetadataSnapshot> {
        match self.try_capture(source).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(ip = %source.client_ip, uri = %source.uri, error = %e, "metadata capture failed");
                None
            }
        }
    }

    async fn try_capture(&self, source: &RequestSource) -> AgentResult<MetadataSnapshot> {
        let content_type = source.header(header::CONTENT_TYPE.as_str()).unwrap_or("");

        let (body, files) = if !source.body_complete {
            (None, Vec::new())
        } else if content_type.contains("multipart/form-data") {
            (None, read_uploaded_files(content_type, source.body.clone()).await?)
        } else if source.body.is_empty() {
            (None, Vec::new())
        } else {
            (Some(String::from_utf8_lossy(&source.body).into_owned()), Vec::new())
        };

        let user_agent = source.header_or_na(header::USER_AGENT.as_str());
        let parsed = user_agent::parse(&user_agent);

        let referrer = source
            .header(header::REFERER.as_str())
            .or_else(|| source.header("referrer"))
            .unwrap_or(NOT_AVAILABLE)
            .to_string();

        let content_length = source
            .header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let data = SnapshotData {
            agent_id: self.agent_id.clone(),
            agent_name: self.agent_name.clone(),
            client_information: ClientInformation {
                ip: source.client_ip.clone(),
                device_type: parsed.device,
                platform: parsed.platform,
                browser: parsed.browser,
                browser_version: parsed.browser_version,
                network_type: UNKNOWN.to_string(),
            },
            http_request: HttpRequestInfo {
                method: source.method.to_string(),
                url: source.uri.path().to_string(),
                host: source.host(),
                headers: RequestHeaders {
                    user_agent,
                    content_type: source.header_or_na(header::CONTENT_TYPE.as_str()),
                    content_length,
                    referrer,
                },
                body,
                query_parameters: source.uri.query().unwrap_or("").to_string(),
                files,
            },
            runtime_information: self.telemetry.sample().await,
        };

        debug!(ip = %source.client_ip, uri = %source.uri, "metadata captured");
        Ok(MetadataSnapshot::new(data, Utc::now()))
    }
}

/// Read every part of a `multipart/form-data` body that carries a filename.
async fn read_uploaded_files(content_type: &str, body: Bytes) -> AgentResult<Vec<UploadedFile>> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| AgentError::Capture(format!("invalid multipart boundary: {}", e)))?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::Capture(format!("malformed multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string)
        else {
            continue;
        };
        let file_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let content = field
            .bytes()
            .await
            .map_err(|e| AgentError::Capture(format!("failed to read part {}: {}", file_name, e)))?;

        files.push(UploadedFile {
            file_size: content.len() as u64,
            file_hash: hex::encode(Sha256::digest(&content)),
            file_content: base64::engine::general_purpose::STANDARD.encode(&content),
            file_name,
            file_type,
        });
    }
    Ok(files)
}

/// A snapshot captured on first use and shared for the rest of the request.
pub struct LazySnapshot<'a> {
    capture: &'a MetadataCapture,
    source: &'a RequestSource,
    cell: OnceCell<Option<Arc<MetadataSnapshot>>>,
}

impl<'a> LazySnapshot<'a> {
    pub fn new(capture: &'a MetadataCapture, source: &'a RequestSource) -> Self {
        Self {
            capture,
            source,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Option<Arc<MetadataSnapshot>> {
        self.cell
            .get_or_init(|| async { self.capture.capture(self.source).await.map(Arc::new) })
            .await
            .clone()
    }

    pub fn is_captured(&self) -> bool {
        self.cell.initialized()
    }

    pub fn client_ip(&self) -> &str {
        &self.source.client_ip
    }
}
