use std::sync::Mutex;
use std::time::Duration;

/// Counters describing one bus connection. Read as a copied snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BusStats {
    pub published: u64,
    pub failed: u64,
    pub bytes_published: u64,
    pub reconnections: u32,
    pub confirm_latency_total: Duration,
}

impl BusStats {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.published + self.failed;
        if attempts == 0 {
            return 1.0;
        }
        self.published as f64 / attempts as f64
    }

    pub fn average_latency(&self) -> Duration {
        if self.published == 0 {
            return Duration::ZERO;
        }
        self.confirm_latency_total / self.published as u32
    }

    /// Counter growth between an older snapshot and this one.
    pub fn since(&self, earlier: &BusStats) -> BusStats {
        BusStats {
            published: self.published.saturating_sub(earlier.published),
            failed: self.failed.saturating_sub(earlier.failed),
            bytes_published: self.bytes_published.saturating_sub(earlier.bytes_published),
            reconnections: self.reconnections.saturating_sub(earlier.reconnections),
            confirm_latency_total: self
                .confirm_latency_total
                .saturating_sub(earlier.confirm_latency_total),
        }
    }
}

#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<BusStats>,
}

impl StatsRecorder {
    pub fn record_published(&self, bytes: usize, latency: Duration) {
        let mut stats = self.lock();
        stats.published += 1;
        stats.bytes_published += bytes as u64;
        stats.confirm_latency_total += latency;
    }

    pub fn record_failed(&self) {
        self.lock().failed += 1;
    }

    pub fn record_reconnect(&self) {
        self.lock().reconnections += 1;
    }

    pub fn snapshot(&self) -> BusStats {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusStats> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
