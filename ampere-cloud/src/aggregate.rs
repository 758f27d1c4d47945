use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use ampere_core::{CabinetId, SensorReport, TrafficReport};
use jiff::Timestamp;
use serde::Serialize;

/// Latest link-quality report of one cabinet plus a running count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSnapshot {
    pub latest: TrafficReport,
    pub reports: u64,
    pub received_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveValue {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: Timestamp,
}

#[derive(Default)]
struct Live {
    traffic: HashMap<CabinetId, TrafficSnapshot>,
    sensors: HashMap<CabinetId, BTreeMap<(String, String), LiveValue>>,
}

/// In-memory view of what cabinets publish on the bus and never persist.
/// Readers get copies.
#[derive(Clone, Default)]
pub struct LiveAggregates {
    inner: Arc<Mutex<Live>>,
}

impl LiveAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Live> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_traffic(&self, cabinet: &CabinetId, report: TrafficReport) {
        let mut live = self.lock();
        let received_at = Timestamp::now();
        live.traffic
            .entry(cabinet.clone())
            .and_modify(|snapshot| {
                snapshot.latest = report.clone();
                snapshot.reports += 1;
                snapshot.received_at = received_at;
            })
            .or_insert_with(|| TrafficSnapshot {
                latest: report,
                reports: 1,
                received_at,
            });
    }

    /// Topic segments win over the body for device and sensor type.
    pub fn record_sensor(
        &self,
        cabinet: &CabinetId,
        device_id: &str,
        sensor_type: &str,
        report: &SensorReport,
    ) {
        let mut live = self.lock();
        live.sensors.entry(cabinet.clone()).or_default().insert(
            (device_id.to_owned(), sensor_type.to_owned()),
            LiveValue {
                device_id: device_id.to_owned(),
                sensor_type: sensor_type.to_owned(),
                value: report.value,
                unit: report.unit.clone(),
                timestamp: report.timestamp,
            },
        );
    }

    pub fn traffic(&self) -> Vec<TrafficSnapshot> {
        let live = self.lock();
        let mut all: Vec<TrafficSnapshot> = live.traffic.values().cloned().collect();
        all.sort_by(|a, b| a.latest.cabinet_id.cmp(&b.latest.cabinet_id));
        all
    }

    pub fn traffic_for(&self, cabinet: &CabinetId) -> Option<TrafficSnapshot> {
        self.lock().traffic.get(cabinet).cloned()
    }

    pub fn sensors_for(&self, cabinet: &CabinetId) -> Vec<LiveValue> {
        self.lock()
            .sensors
            .get(cabinet)
            .map(|values| values.values().cloned().collect())
            .unwrap_or_default()
    }
}
