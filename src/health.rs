use serde::Serialize;
use std::time::Instant;

/// Runtime stats served by `/health`.
#[derive(Debug, Serialize)]
pub struct HealthStats {
    pub uptime: u64,
    pub cpus: usize,
    pub version: &'static str,
}

pub fn health_stats(started_at: Instant) -> HealthStats {
    HealthStats {
        uptime: started_at.elapsed().as_secs(),
        cpus: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        version: crate::VERSION,
    }
}
