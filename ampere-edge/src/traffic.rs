use std::sync::Arc;
use std::time::{Duration, Instant};

use ampere_bus::{BusStats, MessageBus};
use ampere_core::{CabinetId, TrafficReport, topic};
use jiff::Timestamp;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Classifies a link by publish success rate and reconnect churn.
pub fn risk_level(success_rate: f64, reconnections: u32) -> &'static str {
    match (success_rate, reconnections) {
        (rate, r) if rate >= 0.99 && r == 0 => "low",
        (rate, r) if rate >= 0.95 && r <= 1 => "medium",
        (rate, _) if rate >= 0.80 => "high",
        _ => "critical",
    }
}

/// Builds a report from the counter growth over `elapsed`.
pub fn report(cabinet: &CabinetId, delta: &BusStats, elapsed: Duration) -> TrafficReport {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let success_rate = delta.success_rate();

    TrafficReport {
        cabinet_id: cabinet.clone(),
        timestamp: Timestamp::now(),
        throughput_kbps: delta.bytes_published as f64 * 8.0 / 1000.0 / secs,
        latency_ms: delta.average_latency().as_secs_f64() * 1000.0,
        packet_loss_rate: 1.0 - success_rate,
        mqtt_success_rate: success_rate,
        reconnection_count: delta.reconnections,
        risk_level: risk_level(success_rate, delta.reconnections).to_owned(),
    }
}

/// Periodically publishes link quality on `traffic/{id}`.
pub async fn run_traffic_reporter(
    bus: Arc<dyn MessageBus>,
    cabinet: CabinetId,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Traffic reporter started");

    let topic = topic::traffic(&cabinet);
    let mut ticker = tokio::time::interval(interval);
    let mut previous = bus.stats();
    let mut since = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Traffic reporter shutting down");
                break;
            }
            _ = ticker.tick() => {
                let current = bus.stats();
                let report = report(&cabinet, &current.since(&previous), since.elapsed());
                previous = current;
                since = Instant::now();

                if !bus.is_connected() {
                    continue;
                }
                match bus.publish_json(&topic, &report).await {
                    Ok(()) => debug!(risk_level = %report.risk_level, "Traffic report published"),
                    Err(e) => debug!(error = %e, "Traffic report not published"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_link_is_low_risk() {
        let delta = BusStats {
            published: 100,
            failed: 0,
            bytes_published: 125_000,
            reconnections: 0,
            confirm_latency_total: Duration::from_millis(500),
        };

        let report = report(&"CAB-1".into(), &delta, Duration::from_secs(10));
        assert_eq!(report.risk_level, "low");
        assert!((report.throughput_kbps - 100.0).abs() < 1e-9);
        assert!((report.latency_ms - 5.0).abs() < 1e-9);
        assert_eq!(report.packet_loss_rate, 0.0);
    }

    #[test]
    fn failures_and_reconnects_raise_risk() {
        assert_eq!(risk_level(0.97, 1), "medium");
        assert_eq!(risk_level(0.85, 4), "high");
        assert_eq!(risk_level(0.5, 0), "critical");
    }
}
