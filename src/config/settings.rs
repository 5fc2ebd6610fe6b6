use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::defaults;
use crate::error::{AgentError, AgentResult};

/// Top-level configuration for the Whale Sentinel agent.
/// Deserializes from a TOML configuration file; the agent identity can be
/// overridden from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_protection_config")]
    pub protection: ProtectionConfig,

    #[serde(default = "defaults::default_rate_limit_config")]
    pub rate_limit: RateLimitConfig,

    #[serde(default = "defaults::default_telemetry_config")]
    pub telemetry: TelemetryConfig,

    #[serde(default = "defaults::default_background_config")]
    pub background: BackgroundConfig,

    #[serde(default = "defaults::default_gateway_config")]
    pub gateway: GatewayConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the required agent identity.
    ///
    /// A missing file is not an error: every section has defaults and the
    /// identity may come entirely from the environment.
    pub fn load(path: &str) -> AgentResult<Self> {
        let mut settings = if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            let settings: Settings = toml::from_str(&content).map_err(|e| {
                AgentError::Config(format!("failed to parse config file {}: {}", path, e))
            })?;
            info!(path = path, "configuration file loaded");
            settings
        } else {
            debug!(path = path, "configuration file not found, using defaults");
            Settings::default()
        };

        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay agent identity values from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WS_GATEWAY_API") {
            self.agent.gateway_api = Some(v);
        }
        if let Some(v) = lookup("WS_AGENT_AUTH_TOKEN") {
            self.agent.auth_token = Some(v);
        }
        if let Some(v) = lookup("WS_AGENT_ID") {
            self.agent.agent_id = Some(v);
        }
        if let Some(v) = lookup("WS_AGENT_NAME") {
            self.agent.agent_name = Some(v);
        }
        if let Some(v) = lookup("WS_VERIFY_TLS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.agent.verify_tls = Some(true),
                "0" | "false" | "no" | "off" => self.agent.verify_tls = Some(false),
                _ => {}
            }
        }
    }

    /// Every identity field is required; a missing one is fatal at startup.
    pub fn validate(&self) -> AgentResult<()> {
        let required = [
            ("WS_GATEWAY_API", &self.agent.gateway_api),
            ("WS_AGENT_AUTH_TOKEN", &self.agent.auth_token),
            ("WS_AGENT_ID", &self.agent.agent_id),
            ("WS_AGENT_NAME", &self.agent.agent_name),
        ];
        for (name, value) in required {
            match value {
                Some(v) if !v.trim().is_empty() => {}
                _ => return Err(AgentError::Config(format!("{} must be set", name))),
            }
        }
        if self.agent.verify_tls.is_none() {
            return Err(AgentError::Config("WS_VERIFY_TLS must be set".to_string()));
        }
        if self.background.capacity == 0 {
            return Err(AgentError::Config(
                "background.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved identity; only meaningful after [`Settings::validate`] passed.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            gateway_api: self.agent.gateway_api.clone().unwrap_or_default(),
            auth_token: self.agent.auth_token.clone().unwrap_or_default(),
            agent_id: self.agent.agent_id.clone().unwrap_or_default(),
            agent_name: self.agent.agent_name.clone().unwrap_or_default(),
            verify_tls: self.agent.verify_tls.unwrap_or(true),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            server: defaults::default_server_config(),
            protection: defaults::default_protection_config(),
            rate_limit: defaults::default_rate_limit_config(),
            telemetry: defaults::default_telemetry_config(),
            background: defaults::default_background_config(),
            gateway: defaults::default_gateway_config(),
            storage: defaults::default_storage_config(),
            logging: defaults::default_logging_config(),
        }
    }
}

/// Agent identity and gateway credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub gateway_api: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default)]
    pub agent_name: Option<String>,

    #[serde(default)]
    pub verify_tls: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub gateway_api: String,
    pub auth_token: String,
    pub agent_id: String,
    pub agent_name: String,
    pub verify_tls: bool,
}

/// Bind address of the bundled demo server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,
}

/// Whether a block may prevent the handler from running or only replace its
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Evaluate the policy first; a blocked request never reaches the handler.
    BlockBeforeExecute,
    /// Run the handler first; a block replaces the produced response.
    BlockAfterExecute,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default = "defaults::default_execution_order")]
    pub execution_order: ExecutionOrder,

    #[serde(default = "defaults::default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::default_rate_limit_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "defaults::default_rate_limit_max_entries")]
    pub max_entries: usize,

    #[serde(default = "defaults::default_rate_limit_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "defaults::default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::default_cpu_sample_interval_ms")]
    pub cpu_sample_interval_ms: u64,

    #[serde(default)]
    pub host_ip: Option<String>,
}

/// What to do with a fire-and-forget job when the background queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropNewest,
    DropOldest,
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default = "defaults::default_background_capacity")]
    pub capacity: usize,

    #[serde(default = "defaults::default_background_workers")]
    pub workers: usize,

    #[serde(default = "defaults::default_overflow_policy")]
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "defaults::default_gateway_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "defaults::default_profile_refresh_secs")]
    pub profile_refresh_secs: u64,

    #[serde(default = "defaults::default_sync_batch_size")]
    pub sync_batch_size: usize,

    #[serde(default = "defaults::default_gateway_paths")]
    pub paths: GatewayPaths,
}

/// Endpoint paths appended to the gateway base URL.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPaths {
    #[serde(default = "defaults::default_profile_path")]
    pub profile: String,

    #[serde(default = "defaults::default_detection_path")]
    pub detection: String,

    #[serde(default = "defaults::default_synchronize_path")]
    pub synchronize: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_directory")]
    pub directory: String,

    #[serde(default = "defaults::default_log_file_prefix")]
    pub file_prefix: String,

    /// Rotated files kept on disk, the active one included.
    #[serde(default = "defaults::default_log_max_files")]
    pub max_files: usize,
}
