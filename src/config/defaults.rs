use super::settings::{
    BackgroundConfig, ExecutionOrder, GatewayConfig, GatewayPaths, LoggingConfig, OverflowPolicy,
    ProtectionConfig, RateLimitConfig, ServerConfig, StorageConfig, TelemetryConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

pub fn default_protection_config() -> ProtectionConfig {
    ProtectionConfig {
        execution_order: default_execution_order(),
        max_body_bytes: default_max_body_bytes(),
        trust_forwarded_for: false,
    }
}

pub fn default_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        ttl_secs: default_rate_limit_ttl_secs(),
        max_entries: default_rate_limit_max_entries(),
        cleanup_interval_secs: default_rate_limit_cleanup_interval_secs(),
    }
}

pub fn default_telemetry_config() -> TelemetryConfig {
    TelemetryConfig {
        enabled: default_telemetry_enabled(),
        cpu_sample_interval_ms: default_cpu_sample_interval_ms(),
        host_ip: None,
    }
}

pub fn default_background_config() -> BackgroundConfig {
    BackgroundConfig {
        capacity: default_background_capacity(),
        workers: default_background_workers(),
        overflow: default_overflow_policy(),
    }
}

pub fn default_gateway_config() -> GatewayConfig {
    GatewayConfig {
        timeout_ms: default_gateway_timeout_ms(),
        profile_refresh_secs: default_profile_refresh_secs(),
        sync_batch_size: default_sync_batch_size(),
        paths: default_gateway_paths(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        directory: default_log_directory(),
        file_prefix: default_log_file_prefix(),
        max_files: default_log_max_files(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

pub fn default_execution_order() -> ExecutionOrder {
    ExecutionOrder::BlockAfterExecute
}

pub fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

pub fn default_rate_limit_ttl_secs() -> u64 {
    60
}

pub fn default_rate_limit_max_entries() -> usize {
    100_000
}

pub fn default_rate_limit_cleanup_interval_secs() -> u64 {
    30
}

pub fn default_telemetry_enabled() -> bool {
    true
}

pub fn default_cpu_sample_interval_ms() -> u64 {
    100
}

pub fn default_background_capacity() -> usize {
    1_024
}

pub fn default_background_workers() -> usize {
    2
}

pub fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::DropNewest
}

pub fn default_gateway_timeout_ms() -> u64 {
    5_000
}

pub fn default_profile_refresh_secs() -> u64 {
    30
}

pub fn default_sync_batch_size() -> usize {
    100
}

pub fn default_gateway_paths() -> GatewayPaths {
    GatewayPaths {
        profile: default_profile_path(),
        detection: default_detection_path(),
        synchronize: default_synchronize_path(),
    }
}

pub fn default_profile_path() -> String {
    "/api/v1/agent/profile".to_string()
}

pub fn default_detection_path() -> String {
    "/api/v1/agent/detection".to_string()
}

pub fn default_synchronize_path() -> String {
    "/api/v1/agent/synchronize".to_string()
}

pub fn default_sqlite_path() -> String {
    "data/whale-sentinel-agent.db".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_directory() -> String {
    "logs".to_string()
}

pub fn default_log_file_prefix() -> String {
    "whale-sentinel-agent.log".to_string()
}

pub fn default_log_max_files() -> usize {
    4
}
