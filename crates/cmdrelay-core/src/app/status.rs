//! Status - health 用の観測値
//!
//! prober とワーカーが書き込み、`GET /health` が読むだけの共有状態。
//! ロックは使わず atomic のみ（HTTP とワーカーがどちらも await 中に触る）。

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ServiceStatus {
    started: Instant,
    queues_verified: AtomicBool,
    consecutive_errors: AtomicU32,
    processed: AtomicU64,
    /// Unix millis of the last poll attempt, 0 when none yet.
    last_poll_ms: AtomicI64,
}

impl ServiceStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            queues_verified: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
            processed: AtomicU64::new(0),
            last_poll_ms: AtomicI64::new(0),
        }
    }

    pub fn set_queues_verified(&self, verified: bool) {
        self.queues_verified.store(verified, Ordering::Relaxed);
    }

    pub fn queues_verified(&self) -> bool {
        self.queues_verified.load(Ordering::Relaxed)
    }

    pub fn set_consecutive_errors(&self, n: u32) {
        self.consecutive_errors.store(n, Ordering::Relaxed);
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn record_poll(&self, at: DateTime<Utc>) {
        self.last_poll_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        match self.last_poll_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn health_report(&self, shell: &str, storage_account: Option<&str>) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            shell: shell.to_string(),
            timestamp: Utc::now(),
            queues: QueueHealth {
                verified: self.queues_verified(),
                consecutive_errors: self.consecutive_errors(),
                storage_account: storage_account.unwrap_or("unknown").to_string(),
                processed: self.processed(),
                last_poll: self.last_poll(),
            },
            uptime: self.uptime_secs(),
            memory: MemoryUsage::current(),
        }
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub shell: String,
    pub timestamp: DateTime<Utc>,
    pub queues: QueueHealth,
    pub uptime: f64,
    pub memory: MemoryUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub verified: bool,
    pub consecutive_errors: u32,
    pub storage_account: String,
    pub processed: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss_bytes: Option<u64>,
}

impl MemoryUsage {
    /// Resident set size from `/proc/self/status`; `None` off Linux.
    pub fn current() -> Self {
        let rss_bytes = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_vm_rss(&status));
        Self { rss_bytes }
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}
