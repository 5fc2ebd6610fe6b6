use std::net::UdpSocket;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::settings::TelemetryConfig;
use crate::models::metadata::{RuntimeInformation, UNKNOWN};

/// Version of the Rust toolchain this agent was compiled with.
pub const RUNTIME_VERSION: &str = env!("WS_RUSTC_VERSION");

/// Source of host and process telemetry recorded into every snapshot.
#[async_trait]
pub trait HostTelemetry: Send + Sync {
    async fn sample(&self) -> RuntimeInformation;
}

/// Fields that do not change for the life of the process.
#[derive(Debug, Clone)]
struct ProcessFacts {
    ip_address: String,
    pid: u32,
    run_as: String,
    executable_path: String,
    executable_version: String,
    process_name: String,
    process_path: String,
    process_command: Vec<String>,
    os_version: String,
    os_build: String,
}

impl ProcessFacts {
    fn collect(host_ip: Option<String>) -> Self {
        let executable_path = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| UNKNOWN.to_string());
        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| UNKNOWN.to_string());

        Self {
            ip_address: host_ip.unwrap_or_else(resolve_host_ip),
            pid: std::process::id(),
            run_as: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| UNKNOWN.to_string()),
            executable_path,
            executable_version: RUNTIME_VERSION.to_string(),
            process_name,
            process_path: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| UNKNOWN.to_string()),
            process_command: std::env::args().collect(),
            os_version: read_trimmed("/proc/sys/kernel/version"),
            os_build: read_trimmed("/proc/sys/kernel/osrelease"),
        }
    }
}

/// Telemetry read from the running host.
///
/// CPU usage is the share of non-idle jiffies in `/proc/stat` over a short
/// sampling window; memory usage is `(MemTotal - MemAvailable) / MemTotal`
/// from `/proc/meminfo`. Both report zero where `/proc` is unavailable.
pub struct SystemTelemetry {
    facts: ProcessFacts,
    cpu_sample_interval: Duration,
}

impl SystemTelemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        let facts = ProcessFacts::collect(config.host_ip.clone());
        debug!(ip = %facts.ip_address, pid = facts.pid, "host telemetry initialized");
        Self {
            facts,
            cpu_sample_interval: Duration::from_millis(config.cpu_sample_interval_ms),
        }
    }

    async fn cpu_usage(&self) -> f64 {
        let Some(before) = read_cpu_times() else {
            return 0.0;
        };
        tokio::time::sleep(self.cpu_sample_interval).await;
        let Some(after) = read_cpu_times() else {
            return 0.0;
        };
        before.usage_until(&after)
    }
}

#[async_trait]
impl HostTelemetry for SystemTelemetry {
    async fn sample(&self) -> RuntimeInformation {
        let cpu_usage = self.cpu_usage().await;
        let facts = &self.facts;

        RuntimeInformation {
            ip_address: facts.ip_address.clone(),
            pid: facts.pid,
            run_as: facts.run_as.clone(),
            executable_path: facts.executable_path.clone(),
            executable_name: std::thread::current()
                .name()
                .unwrap_or(UNKNOWN)
                .to_string(),
            executable_version: facts.executable_version.clone(),
            process_name: facts.process_name.clone(),
            process_path: facts.process_path.clone(),
            process_command: facts.process_command.clone(),
            platform: std::env::consts::OS.to_string(),
            cpu_usage,
            memory_usage: memory_usage(),
            architecture: std::env::consts::ARCH.to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: facts.os_version.clone(),
            os_build: facts.os_build.clone(),
        }
    }
}

/// Fixed telemetry; used when telemetry is disabled and in tests.
pub struct StaticTelemetry {
    info: RuntimeInformation,
}

impl StaticTelemetry {
    pub fn new(info: RuntimeInformation) -> Self {
        Self { info }
    }

    /// Process facts only, with zeroed usage figures and no `/proc` sampling.
    pub fn from_process(host_ip: Option<String>) -> Self {
        let facts = ProcessFacts::collect(host_ip);
        Self::new(RuntimeInformation {
            ip_address: facts.ip_address,
            pid: facts.pid,
            run_as: facts.run_as,
            executable_path: facts.executable_path,
            executable_name: UNKNOWN.to_string(),
            executable_version: facts.executable_version,
            process_name: facts.process_name,
            process_path: facts.process_path,
            process_command: facts.process_command,
            platform: std::env::consts::OS.to_string(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            architecture: std::env::consts::ARCH.to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: facts.os_version,
            os_build: facts.os_build,
        })
    }
}

#[async_trait]
impl HostTelemetry for StaticTelemetry {
    async fn sample(&self) -> RuntimeInformation {
        self.info.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    /// Parse the aggregate `cpu` line of `/proc/stat`.
    fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self {
            idle,
            total: fields.iter().sum(),
        })
    }

    fn usage_until(&self, later: &CpuTimes) -> f64 {
        let total = later.total.saturating_sub(self.total);
        if total == 0 {
            return 0.0;
        }
        let idle = later.idle.saturating_sub(self.idle);
        round2((total.saturating_sub(idle)) as f64 / total as f64 * 100.0)
    }
}

fn read_cpu_times() -> Option<CpuTimes> {
    std::fs::read_to_string("/proc/stat")
        .ok()
        .and_then(|s| CpuTimes::parse(&s))
}

fn memory_usage() -> f64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_meminfo(&s))
        .unwrap_or(0.0)
}

fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(round2(total.saturating_sub(available) as f64 / total as f64 * 100.0))
}

/// Outbound interface address. Connecting a UDP socket sends no packets.
fn resolve_host_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn read_trimmed(path: &str) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| UNKNOWN.to_string())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
