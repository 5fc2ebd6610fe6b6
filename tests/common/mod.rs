//! Shared harness for pipeline integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Request};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use whale_sentinel_agent::agent::profile_store::ProfileStore;
use whale_sentinel_agent::agent::{DetectionService, StorageWriter, Synchronizer};
use whale_sentinel_agent::config::{ExecutionOrder, Settings};
use whale_sentinel_agent::error::{AgentError, AgentResult};
use whale_sentinel_agent::models::detection::{DetectionMetrics, DetectionResult, Verdict};
use whale_sentinel_agent::models::metadata::MetadataSnapshot;
use whale_sentinel_agent::models::profile::Profile;
use whale_sentinel_agent::protection::telemetry::StaticTelemetry;
use whale_sentinel_agent::{protect, Collaborators, ProtectionPipeline};

pub const CLIENT_IP: &str = "203.0.113.7";

pub enum DetectionBehavior {
    Respond(DetectionResult),
    Empty,
    Fail,
}

pub struct MockDetection {
    behavior: Mutex<DetectionBehavior>,
    pub calls: AtomicUsize,
    pub last: Mutex<Option<MetadataSnapshot>>,
}

impl MockDetection {
    pub fn new(behavior: DetectionBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionService for MockDetection {
    async fn detect(&self, snapshot: &MetadataSnapshot) -> AgentResult<Option<DetectionResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(snapshot.clone());
        match &*self.behavior.lock() {
            DetectionBehavior::Respond(result) => Ok(Some(result.clone())),
            DetectionBehavior::Empty => Ok(None),
            DetectionBehavior::Fail => Err(AgentError::Gateway("detection unavailable".to_string())),
        }
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    pub persisted: Mutex<Vec<MetadataSnapshot>>,
}

impl RecordingStorage {
    pub fn count(&self) -> usize {
        self.persisted.lock().len()
    }
}

#[async_trait]
impl StorageWriter for RecordingStorage {
    async fn persist(&self, snapshot: &MetadataSnapshot) -> AgentResult<()> {
        self.persisted.lock().push(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingSynchronizer {
    pub calls: AtomicUsize,
}

impl CountingSynchronizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synchronizer for CountingSynchronizer {
    async fn synchronize(&self, _profile: &Profile) -> AgentResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn settings(order: ExecutionOrder) -> Settings {
    let mut settings = Settings::default();
    settings.apply_env(|key| {
        let value = match key {
            "WS_GATEWAY_API" => "http://127.0.0.1:1",
            "WS_AGENT_AUTH_TOKEN" => "test-token",
            "WS_AGENT_ID" => "agent-test",
            "WS_AGENT_NAME" => "shop-api",
            "WS_VERIFY_TLS" => "true",
            _ => return None,
        };
        Some(value.to_string())
    });
    settings.protection.execution_order = order;
    settings.background.workers = 1;
    settings.background.capacity = 256;
    settings
}

pub fn attack_result(verdict: Verdict) -> DetectionResult {
    DetectionResult::new(
        DetectionMetrics {
            web_attack_detection_score: 97.0,
            dga_detection_score: 1.0,
            common_attack_detection: Default::default(),
        },
        verdict,
    )
}

pub struct Harness {
    pub app: Router,
    pub pipeline: Arc<ProtectionPipeline>,
    pub profiles: Arc<ProfileStore>,
    pub detection: Arc<MockDetection>,
    pub storage: Arc<RecordingStorage>,
    pub synchronizer: Arc<CountingSynchronizer>,
    pub handler_hits: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(profile: Option<Profile>, detection: DetectionBehavior) -> Self {
        Self::with_settings(settings(ExecutionOrder::BlockAfterExecute), profile, detection)
    }

    pub fn with_settings(settings: Settings, profile: Option<Profile>, detection: DetectionBehavior) -> Self {
        let profiles = Arc::new(ProfileStore::new());
        profiles.set(profile);
        let detection = Arc::new(MockDetection::new(detection));
        let storage = Arc::new(RecordingStorage::default());
        let synchronizer = Arc::new(CountingSynchronizer::default());

        let pipeline = Arc::new(
            ProtectionPipeline::new(
                &settings,
                Collaborators {
                    profiles: profiles.clone(),
                    detection: detection.clone(),
                    storage: storage.clone(),
                    synchronizer: synchronizer.clone(),
                    telemetry: Arc::new(StaticTelemetry::from_process(Some("10.9.9.9".to_string()))),
                },
            )
            .expect("pipeline"),
        );

        let handler_hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/v1/search", post(search))
            .route("/page", get(page))
            .route("/echo", post(echo))
            .route_layer(from_fn_with_state(pipeline.clone(), protect))
            .with_state(handler_hits.clone());

        Self {
            app,
            pipeline,
            profiles,
            detection,
            storage,
            synchronizer,
            handler_hits,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.expect("router is infallible")
    }

    pub fn hits(&self) -> usize {
        self.handler_hits.load(Ordering::SeqCst)
    }

    /// Drain the background queue so job side effects are visible.
    pub async fn drain(&self) {
        self.pipeline.shutdown().await;
    }
}

async fn search(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"results": []}))
}

async fn page(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "<h1>hello</h1>")
}

/// Reports what the handler actually received.
async fn echo(State(hits): State<Arc<AtomicUsize>>, body: Bytes) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "len": body.len(),
        "sha256": hex::encode(Sha256::digest(&body)),
    }))
}

pub fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(format!("{}:40000", CLIENT_IP).parse().expect("socket addr"))
}

pub fn json_request(path: &str, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "curl/8.5.0")
        .body(Body::from(body.to_string()))
        .expect("request");
    req.extensions_mut().insert(peer());
    req
}

pub fn get_request(path: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("request");
    req.extensions_mut().insert(peer());
    req
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
