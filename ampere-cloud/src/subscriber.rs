//! Upstream bus traffic from every cabinet.

use std::sync::Arc;

use ampere_bus::{BusError, BusMessage, MessageBus};
use ampere_core::topic::{self, Upstream};
use ampere_core::{
    AccessLogBatch, AlertReport, CommandAck, PolicyAck, SensorReport, TrafficReport,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ack::AckHandler;
use crate::aggregate::LiveAggregates;
use crate::ingest::Ingest;
use crate::ledger::PolicyLedger;
use crate::registry::Registries;

pub const FILTERS: [&str; 6] = [
    topic::ALERTS_FILTER,
    topic::ACCESS_LOGS_FILTER,
    topic::POLICY_ACK_FILTER,
    topic::COMMAND_RESPONSES_FILTER,
    topic::SENSORS_FILTER,
    topic::TRAFFIC_FILTER,
];

pub struct Subscriber<R> {
    pub ingest: Ingest<R>,
    pub acks: AckHandler<R>,
    pub ledger: PolicyLedger<R>,
    pub aggregates: LiveAggregates,
}

fn decode<T: DeserializeOwned>(message: &BusMessage) -> Option<T> {
    match serde_json::from_slice(&message.payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "Dropping malformed message");
            None
        }
    }
}

impl<R: Registries> Subscriber<R> {
    pub async fn handle(&self, message: &BusMessage) {
        let Some(upstream) = topic::parse_upstream(&message.topic) else {
            debug!(topic = %message.topic, "Ignoring message on unknown topic");
            return;
        };

        match upstream {
            Upstream::Alerts(cabinet) => {
                let Some(report) = decode::<AlertReport>(message) else {
                    return;
                };
                if let Err(e) = self.ingest.alerts(&cabinet, &[report]).await {
                    warn!(cabinet_id = %cabinet, error = %e, "Failed to ingest pushed alert");
                }
            }
            Upstream::AccessLogs(cabinet) => {
                let Some(batch) = decode::<AccessLogBatch>(message) else {
                    return;
                };
                if batch.cabinet_id != cabinet {
                    warn!(topic_cabinet = %cabinet, body_cabinet = %batch.cabinet_id, "Dropping access logs for another cabinet");
                    return;
                }
                match self.ingest.access_logs(&cabinet, &batch.logs).await {
                    Ok(stored) => debug!(cabinet_id = %cabinet, stored, "Access logs ingested"),
                    Err(e) => warn!(cabinet_id = %cabinet, error = %e, "Failed to ingest access logs"),
                }
            }
            Upstream::PolicyAck(cabinet) => {
                let Some(ack) = decode::<PolicyAck>(message) else {
                    return;
                };
                if let Err(e) = self.ledger.handle_ack(&cabinet, &ack).await {
                    warn!(cabinet_id = %cabinet, policy_id = %ack.policy_id, error = %e, "Failed to apply policy ack");
                }
            }
            Upstream::CommandResponse {
                cabinet,
                command_id,
            } => {
                let Some(mut ack) = decode::<CommandAck>(message) else {
                    return;
                };
                if ack.command_id.is_empty() {
                    ack.command_id = command_id;
                } else if ack.command_id != command_id {
                    warn!(topic_command = %command_id, body_command = %ack.command_id, "Dropping ack with mismatched command id");
                    return;
                }
                if let Err(e) = self.acks.apply(&cabinet, &ack).await {
                    warn!(cabinet_id = %cabinet, command_id = %ack.command_id, error = %e, "Rejected command ack");
                }
            }
            Upstream::Sensor {
                cabinet,
                device_id,
                sensor_type,
            } => {
                if let Some(report) = decode::<SensorReport>(message) {
                    self.aggregates
                        .record_sensor(&cabinet, &device_id, &sensor_type, &report);
                }
            }
            Upstream::Traffic(cabinet) => {
                if let Some(report) = decode::<TrafficReport>(message) {
                    self.aggregates.record_traffic(&cabinet, report);
                }
            }
        }
    }
}

/// Subscribes to every upstream filter and handles messages until `cancel`
/// fires or all subscriptions close.
pub async fn run_subscriber<R: Registries>(
    subscriber: Subscriber<R>,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
) -> Result<(), BusError> {
    let [alerts, access_logs, policy_acks, responses, sensors, traffic] = FILTERS;
    let mut alerts = bus.subscribe(alerts).await?;
    let mut access_logs = bus.subscribe(access_logs).await?;
    let mut policy_acks = bus.subscribe(policy_acks).await?;
    let mut responses = bus.subscribe(responses).await?;
    let mut sensors = bus.subscribe(sensors).await?;
    let mut traffic = bus.subscribe(traffic).await?;

    info!(filters = ?FILTERS, "Bus subscriber started");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Bus subscriber shutting down");
                break;
            }
            Some(m) = alerts.recv() => m,
            Some(m) = access_logs.recv() => m,
            Some(m) = policy_acks.recv() => m,
            Some(m) = responses.recv() => m,
            Some(m) = sensors.recv() => m,
            Some(m) = traffic.recv() => m,
            else => {
                warn!("All bus subscriptions closed");
                break;
            }
        };

        subscriber.handle(&message).await;
    }

    Ok(())
}
