use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::lenient;

/// Active protection mode, supplied by the profile on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    /// Protection disabled; responses pass through untouched.
    Off,
    /// Record request metadata for later synchronization.
    #[default]
    Lite,
    /// Run detection but never block.
    Monitor,
    /// Run detection and block confirmed attacks.
    Protection,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningMode::Off => write!(f, "off"),
            RunningMode::Lite => write!(f, "lite"),
            RunningMode::Monitor => write!(f, "monitor"),
            RunningMode::Protection => write!(f, "protection"),
        }
    }
}

impl RunningMode {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(Self::Off),
            "lite" => Some(Self::Lite),
            "monitor" => Some(Self::Monitor),
            "protection" => Some(Self::Protection),
            _ => None,
        }
    }
}

/// Outcome of the last attempt to reconcile lite-mode data with the gateway.
/// Any status the agent does not know reads as `Unknown`, which is treated
/// like a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    None,
    Fail,
    Success,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub enable: bool,

    /// Requests allowed per client per UTC minute.
    #[serde(default, deserialize_with = "lenient::count")]
    pub threshold: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionModule {
    /// Score at or above which the module considers a request malicious.
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureResponseHeaders {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub enable: bool,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub headers: BTreeMap<String, String>,
}

/// Policy profile for this agent, as served by the gateway.
///
/// Reading is tolerant: a field outside its expected domain takes its
/// default rather than failing the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "lenient::running_mode")]
    pub running_mode: RunningMode,

    #[serde(default, deserialize_with = "lenient::running_mode")]
    pub last_run_mode: RunningMode,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub lite_mode_data_is_synchronized: bool,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub lite_mode_data_synchronize_status: SyncStatus,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ws_request_rate_limit: RateLimitPolicy,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ws_module_web_attack_detection: DetectionModule,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ws_module_dga_detection: DetectionModule,

    #[serde(default, deserialize_with = "lenient::or_default")]
    pub secure_response_headers: SecureResponseHeaders,
}

impl Profile {
    pub fn with_mode(running_mode: RunningMode) -> Self {
        Self {
            running_mode,
            ..Self::default()
        }
    }

    /// True when the agent just left lite mode and the data it recorded
    /// there has not been reconciled with the gateway yet.
    pub fn needs_lite_sync(&self) -> bool {
        self.running_mode != RunningMode::Lite
            && self.last_run_mode == RunningMode::Lite
            && !self.lite_mode_data_is_synchronized
            && self.lite_mode_data_synchronize_status != SyncStatus::Success
    }

    pub fn rate_limit_threshold(&self) -> Option<u64> {
        self.ws_request_rate_limit
            .enable
            .then_some(self.ws_request_rate_limit.threshold)
    }

    pub fn secure_headers_enabled(&self) -> bool {
        self.secure_response_headers.enable
    }
}
