use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::background::{BackgroundJob, BackgroundQueue};
use crate::agent::DetectionService;
use crate::models::detection::{DetectionMetrics, DetectionResult};
use crate::models::profile::{DetectionModule, Profile, RunningMode};
use crate::protection::capture::LazySnapshot;
use crate::protection::rate_limiter::RateLimiter;

/// The agent's own opinion of a request, from the profile thresholds alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfAction {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    RateLimited,
    Attack,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::RateLimited => write!(f, "rate_limited"),
            BlockReason::Attack => write!(f, "attack"),
        }
    }
}

/// Outcome of one pass through the mode dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Mode is `off`: return the handler's response untouched.
    PassThrough,
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

fn exceeds(score: f64, module: &DetectionModule) -> bool {
    module.threshold.is_some_and(|threshold| score >= threshold)
}

/// `Block` iff any score reaches its configured threshold or any
/// common-attack flag is set. An absent threshold is never exceeded.
pub fn self_action(profile: &Profile, metrics: &DetectionMetrics) -> SelfAction {
    let over_threshold = exceeds(
        metrics.web_attack_detection_score,
        &profile.ws_module_web_attack_detection,
    ) || exceeds(metrics.dga_detection_score, &profile.ws_module_dga_detection)
        || metrics.any_common_attack();

    if over_threshold {
        SelfAction::Block
    } else {
        SelfAction::Allow
    }
}

/// Protection mode blocks only when the service verdict and the agent's own
/// threshold check agree.
pub fn should_block(profile: &Profile, result: &DetectionResult) -> bool {
    result.verdict.is_abnormal() && self_action(profile, &result.metrics) == SelfAction::Block
}

pub fn needs_synchronization(profile: &Profile) -> bool {
    profile.needs_lite_sync()
}

/// Applies a profile to one request. Holds no per-request state.
pub struct ModeDispatcher {
    rate_limiter: Arc<RateLimiter>,
    detection: Arc<dyn DetectionService>,
    queue: Arc<BackgroundQueue>,
}

impl ModeDispatcher {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        detection: Arc<dyn DetectionService>,
        queue: Arc<BackgroundQueue>,
    ) -> Self {
        Self {
            rate_limiter,
            detection,
            queue,
        }
    }

    pub async fn dispatch(&self, profile: &Arc<Profile>, snapshot: &LazySnapshot<'_>) -> Decision {
        let mode = profile.running_mode;
        if mode == RunningMode::Off {
            return Decision::PassThrough;
        }

        if let Some(threshold) = profile.rate_limit_threshold() {
            if self.rate_limiter.should_block(snapshot.client_ip(), threshold) {
                info!(ip = snapshot.client_ip(), threshold = threshold, mode = %mode, "request blocked by rate limit");
                self.persist(snapshot).await;
                return Decision::Block(BlockReason::RateLimited);
            }
        }

        if mode == RunningMode::Lite {
            self.persist(snapshot).await;
        }

        if needs_synchronization(profile) {
            debug!(mode = %mode, "lite mode data pending, scheduling synchronization");
            self.queue
                .submit(BackgroundJob::Synchronize(profile.clone()))
                .await;
        }

        match mode {
            RunningMode::Off | RunningMode::Lite => Decision::Allow,
            RunningMode::Monitor => {
                if self.detect(snapshot).await.is_none() {
                    self.persist(snapshot).await;
                }
                Decision::Allow
            }
            RunningMode::Protection => match self.detect(snapshot).await {
                Some(result) if should_block(profile, &result) => {
                    info!(
                        ip = snapshot.client_ip(),
                        verdict = %result.verdict,
                        web_attack_score = result.metrics.web_attack_detection_score,
                        dga_score = result.metrics.dga_detection_score,
                        "request blocked by detection"
                    );
                    Decision::Block(BlockReason::Attack)
                }
                Some(_) => Decision::Allow,
                None => {
                    self.persist(snapshot).await;
                    Decision::Allow
                }
            },
        }
    }

    async fn persist(&self, snapshot: &LazySnapshot<'_>) {
        if let Some(snapshot) = snapshot.get().await {
            self.queue.submit(BackgroundJob::Persist(snapshot)).await;
        }
    }

    /// Detection errors count as "no result".
    async fn detect(&self, snapshot: &LazySnapshot<'_>) -> Option<DetectionResult> {
        let captured = snapshot.get().await?;
        match self.detection.detect(&captured).await {
            Ok(result) => result,
            Err(e) => {
                warn!(ip = snapshot.client_ip(), error = %e, "detection failed, continuing without result");
                None
            }
        }
    }
}
