//! Per-domain latency and reliability tracking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Weight of the newest sample in the response-time moving average.
const EMA_ALPHA: f64 = 0.3;
/// Timeout granted relative to the average response time.
const TIMEOUT_HEADROOM: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainStats {
    pub successes: u64,
    pub failures: u64,
    /// Exponential moving average of successful response times.
    pub avg_response_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DomainStats {
    /// Smoothed success rate in `[0, 1]`; 0.5 with no history.
    pub fn reliability(&self) -> f64 {
        (self.successes as f64 + 1.0) / ((self.successes + self.failures) as f64 + 2.0)
    }
}

/// Latency history that drives adaptive per-domain timeouts.
#[derive(Debug)]
pub struct DomainMetrics {
    stats: Mutex<HashMap<String, DomainStats>>,
    default_timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl DomainMetrics {
    pub fn new(default_timeout: Duration, min_timeout: Duration, max_timeout: Duration) -> Self {
        let max_timeout = max_timeout.max(min_timeout);
        Self {
            stats: Mutex::new(HashMap::new()),
            default_timeout: default_timeout.clamp(min_timeout, max_timeout),
            min_timeout,
            max_timeout,
        }
    }

    /// Timeout for the next request to `domain`: the average response time
    /// with headroom, clamped to `[min, max]`. Unknown domains get the default.
    pub fn timeout_for(&self, domain: &str) -> Duration {
        let avg = self
            .stats
            .lock()
            .ok()
            .and_then(|s| s.get(domain).and_then(|d| d.avg_response_ms));
        match avg {
            Some(ms) => {
                let proposed = Duration::from_millis((ms * TIMEOUT_HEADROOM).round() as u64);
                proposed.clamp(self.min_timeout, self.max_timeout)
            }
            None => self.default_timeout,
        }
    }

    pub fn record_success(&self, domain: &str, elapsed: Duration) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        let entry = stats.entry(domain.to_string()).or_default();
        let sample = elapsed.as_secs_f64() * 1000.0;
        entry.avg_response_ms = Some(match entry.avg_response_ms {
            Some(prev) => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev,
            None => sample,
        });
        entry.successes += 1;
        debug!(
            domain,
            elapsed_ms = sample as u64,
            avg_ms = entry.avg_response_ms.unwrap_or_default() as u64,
            "Recorded fetch success"
        );
    }

    pub fn record_failure(&self, domain: &str, error: &str) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        let entry = stats.entry(domain.to_string()).or_default();
        entry.failures += 1;
        entry.last_error = Some(error.to_string());
    }

    /// Reliability score for `domain`; 0.5 when unseen.
    pub fn reliability(&self, domain: &str) -> f64 {
        self.stats
            .lock()
            .ok()
            .and_then(|s| s.get(domain).map(DomainStats::reliability))
            .unwrap_or(0.5)
    }

    pub fn snapshot(&self) -> HashMap<String, DomainStats> {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
