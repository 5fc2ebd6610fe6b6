use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::BytesMut;
use chrono::{SecondsFormat, Utc};
use futures_util::stream::{self, StreamExt};
use http_body_util::BodyExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::background::{BackgroundJob, BackgroundQueue, JobExecutor};
use crate::agent::{DetectionService, ProfileSource, StorageWriter, Synchronizer};
use crate::config::settings::{ExecutionOrder, Settings};
use crate::error::AgentResult;
use crate::models::metadata::UNKNOWN;
use crate::models::profile::Profile;

use super::capture::{LazySnapshot, MetadataCapture, RequestSource};
use super::dispatcher::{Decision, ModeDispatcher};
use super::rate_limiter::RateLimiter;
use super::secure_response;
use super::telemetry::HostTelemetry;

pub const BLOCK_MESSAGE: &str = "Forbidden: Request blocked by Whale Sentinel Protection.";

/// External services the pipeline depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileSource>,
    pub detection: Arc<dyn DetectionService>,
    pub storage: Arc<dyn StorageWriter>,
    pub synchronizer: Arc<dyn Synchronizer>,
    pub telemetry: Arc<dyn HostTelemetry>,
}

/// Wraps a request handler with profile-driven protection.
///
/// Owns the process-wide rate-limit store and background queue; both live
/// until [`ProtectionPipeline::shutdown`].
pub struct ProtectionPipeline {
    profiles: Arc<dyn ProfileSource>,
    capture: MetadataCapture,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: ModeDispatcher,
    queue: Arc<BackgroundQueue>,
    execution_order: ExecutionOrder,
    max_body_bytes: usize,
    trust_forwarded_for: bool,
}

impl ProtectionPipeline {
    /// Validate the agent identity and start the background workers.
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &Settings, collaborators: Collaborators) -> AgentResult<Self> {
        settings.validate()?;
        let identity = settings.identity();

        let rate_limiter = Arc::new(RateLimiter::new(&settings.rate_limit));
        let queue = Arc::new(BackgroundQueue::start(
            &settings.background,
            JobExecutor::new(collaborators.storage, collaborators.synchronizer),
        ));
        let dispatcher = ModeDispatcher::new(
            rate_limiter.clone(),
            collaborators.detection,
            queue.clone(),
        );

        info!(
            agent_id = %identity.agent_id,
            agent_name = %identity.agent_name,
            execution_order = ?settings.protection.execution_order,
            "protection pipeline initialized"
        );

        Ok(Self {
            profiles: collaborators.profiles,
            capture: MetadataCapture::new(
                identity.agent_id,
                identity.agent_name,
                collaborators.telemetry,
            ),
            rate_limiter,
            dispatcher,
            queue,
            execution_order: settings.protection.execution_order,
            max_body_bytes: settings.protection.max_body_bytes,
            trust_forwarded_for: settings.protection.trust_forwarded_for,
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    pub fn queue(&self) -> &BackgroundQueue {
        &self.queue
    }

    /// Run `handler` under the current profile and return the response to
    /// send. No internal failure is surfaced to the client.
    pub async fn process<H, Fut>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let start = Instant::now();
        let (parts, body) = request.into_parts();

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client_ip = extract_client_ip(&parts.headers, peer, self.trust_forwarded_for);

        let (captured_body, body_complete, handler_body) =
            match buffer_body(body, &parts.headers, self.max_body_bytes, &client_ip).await {
                BufferedBody::Complete(bytes) => (bytes.clone(), true, Body::from(bytes)),
                BufferedBody::Passthrough(body) => (Bytes::new(), false, body),
            };

        let source = RequestSource {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body: captured_body,
            body_complete,
            client_ip,
        };
        let request = Request::from_parts(parts, handler_body);
        let snapshot = LazySnapshot::new(&self.capture, &source);

        let Some(profile) = self.profiles.current() else {
            debug!(ip = %source.client_ip, "no profile available, recording request only");
            if let Some(captured) = snapshot.get().await {
                self.queue.submit(BackgroundJob::Persist(captured)).await;
            }
            return handler(request).await;
        };

        let response = match self.execution_order {
            ExecutionOrder::BlockBeforeExecute => {
                let decision = self.dispatcher.dispatch(&profile, &snapshot).await;
                if decision.is_block() {
                    blocked_response(&source.client_ip)
                } else {
                    let response = handler(request).await;
                    finish(&profile, decision, response)
                }
            }
            ExecutionOrder::BlockAfterExecute => {
                let response = handler(request).await;
                let decision = self.dispatcher.dispatch(&profile, &snapshot).await;
                if decision.is_block() {
                    blocked_response(&source.client_ip)
                } else {
                    finish(&profile, decision, response)
                }
            }
        };

        debug!(
            ip = %source.client_ip,
            method = %source.method,
            path = %source.uri.path(),
            mode = %profile.running_mode,
            status = response.status().as_u16(),
            captured = snapshot.is_captured(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "request processed"
        );
        response
    }

    /// Stop the background queue after draining pending jobs.
    pub async fn shutdown(&self) {
        info!("shutting down protection pipeline");
        self.queue.shutdown().await;
    }
}

enum BufferedBody {
    /// Read in full; capture and the handler share these bytes.
    Complete(Bytes),
    /// Not capturable. The handler still receives every byte (or the
    /// stream error) it would have seen without the pipeline.
    Passthrough(Body),
}

/// Read the body for capture without ever changing what the handler gets.
async fn buffer_body(mut body: Body, headers: &HeaderMap, limit: usize, client_ip: &str) -> BufferedBody {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        debug!(ip = client_ip, content_length = declared, limit = limit, "body over capture limit, not buffering");
        return BufferedBody::Passthrough(body);
    }

    let mut buffered = BytesMut::new();
    loop {
        match body.frame().await {
            None => return BufferedBody::Complete(buffered.freeze()),
            Some(Ok(frame)) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                buffered.extend_from_slice(&data);
                if buffered.len() > limit {
                    debug!(ip = client_ip, limit = limit, "streamed body over capture limit, passing through");
                    return BufferedBody::Passthrough(replay(buffered.freeze(), body));
                }
            }
            Some(Err(e)) => {
                warn!(ip = client_ip, error = %e, "request body stream failed");
                let head = stream::once(async move { Ok::<Bytes, axum::Error>(buffered.freeze()) });
                let tail = stream::once(async move { Err::<Bytes, axum::Error>(e) });
                return BufferedBody::Passthrough(Body::from_stream(head.chain(tail)));
            }
        }
    }
}

/// `prefix` followed by whatever is left of `rest`.
fn replay(prefix: Bytes, rest: Body) -> Body {
    let head = stream::once(async move { Ok::<Bytes, axum::Error>(prefix) });
    Body::from_stream(head.chain(rest.into_data_stream()))
}

fn finish(profile: &Profile, decision: Decision, mut response: Response) -> Response {
    match decision {
        Decision::PassThrough | Decision::Block(_) => response,
        Decision::Allow => {
            if profile.secure_headers_enabled() {
                secure_response::apply(profile, &mut response);
            }
            response
        }
    }
}

/// axum middleware entry point, for use with
/// `axum::middleware::from_fn_with_state(pipeline, protect)`.
pub async fn protect(
    State(pipeline): State<Arc<ProtectionPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    pipeline.process(request, |req| next.run(req)).await
}

#[derive(Serialize)]
struct BlockedBody<'a> {
    msg: &'static str,
    time: String,
    ip: &'a str,
}

/// 403 with `{"msg", "time", "ip"}` in that key order.
pub fn blocked_response(client_ip: &str) -> Response {
    let body = BlockedBody {
        msg: BLOCK_MESSAGE,
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ip: client_ip,
    };
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// Resolve the client address used for rate limiting and capture.
///
/// Forwarding headers are honoured only when `trust_forwarded_for` is set;
/// the left-most `X-Forwarded-For` entry wins over `X-Real-IP`.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        if let Some(xff) = headers.get("x-forwarded-for") {
            if let Ok(val) = xff.to_str() {
                if let Some(first) = val.split(',').next() {
                    if let Ok(ip) = first.trim().parse::<IpAddr>() {
                        return ip.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip") {
            if let Ok(val) = real_ip.to_str() {
                if let Ok(ip) = val.trim().parse::<IpAddr>() {
                    return ip.to_string();
                }
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}
