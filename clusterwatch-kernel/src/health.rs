use crate::refresh::MatrixStore;
use serde::Serialize;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub domains: usize,
    pub instances: usize,
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub loading: bool,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, store: &MatrixStore) -> KernelHealth {
        let status = store.status();
        let snapshot = store.snapshot();
        let (domains, instances) = snapshot
            .as_ref()
            .map(|s| (s.domains.len(), s.domains.iter().map(|d| d.instances.len()).sum::<usize>()))
            .unwrap_or((0, 0));

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            domains,
            instances,
            refresh_successes: status.successes,
            refresh_failures: status.failures,
            last_refresh: snapshot.map(|s| s.generated_at),
            last_error: status.last_error,
            loading: status.loading,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // inconnu hors Linux
    0.0
}
