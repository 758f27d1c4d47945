use ampere_cloud::registry::memory::InMemoryRegistries;
use ampere_cloud::registry::models::{AlertFilter, Cabinet, Command, DistributionLogEntry};
use ampere_cloud::registry::sqlite::{SqliteRegistries, SqliteRegistryError};
use ampere_cloud::registry::{
    AlertRegistry, CabinetRegistry, CommandRegistry, PolicyRegistry, Registries,
    TelemetryRegistry, TIMEOUT_RESULT,
};
use ampere_core::{
    AccessLogId, AccessLogReport, AlertReport, CabinetId, CabinetMetadata, CloudSeverity,
    CommandStatus, CommandType, DistributionOperation, DistributionStatus, EdgeAlertId,
    PolicyDocument, PolicyId, SampleId, SensorReport,
};
use jiff::{SignedDuration, Timestamp};
use tempfile::NamedTempFile;

fn cabinet(id: &str, api_key: &str) -> Cabinet {
    Cabinet {
        id: id.into(),
        name: Some(format!("cabinet {id}")),
        api_key: api_key.into(),
        location: None,
        ip_address: None,
        firmware_version: None,
        created_at: Timestamp::now(),
        last_sync_at: None,
    }
}

fn command(cabinet: &str) -> Command {
    Command::new(
        cabinet.into(),
        CommandType::QueryStatus,
        serde_json::json!({"verbose": true}),
        "operator",
        Timestamp::now(),
    )
}

fn breach(edge_id: Option<i64>, value: f64) -> AlertReport {
    AlertReport {
        alert_id: edge_id.map(EdgeAlertId),
        device_id: "dev-7".into(),
        alert_type: "temperature_high".into(),
        severity: CloudSeverity::Error,
        message: format!("temperature {value} above 55"),
        value,
        threshold: 55.0,
        timestamp: Timestamp::now(),
        resolved: false,
        resolved_at: None,
    }
}

fn sample(id: i64) -> SensorReport {
    SensorReport {
        id: SampleId(id),
        device_id: "dev-1".into(),
        sensor_type: "voltage".into(),
        value: 3.3,
        unit: "V".into(),
        quality: 99,
        timestamp: Timestamp::now(),
    }
}

fn device_policy(id: &str) -> PolicyDocument {
    PolicyDocument {
        id: PolicyId(id.into()),
        name: format!("policy {id}"),
        subject_type: "device".into(),
        document: serde_json::json!({"effect": "allow"}),
    }
}

async fn cabinet_lifecycle<C: CabinetRegistry>(cabinets: &C) -> Result<(), C::Error> {
    assert!(cabinets.register(cabinet("CAB-2", "key-2")).await?);
    assert!(cabinets.register(cabinet("CAB-1", "key-1")).await?);
    assert!(!cabinets.register(cabinet("CAB-1", "other")).await?);

    let found = cabinets.find_by_api_key("key-1").await?;
    assert_eq!(found.map(|c| c.id), Some(CabinetId::from("CAB-1")));
    assert!(cabinets.find_by_api_key("nope").await?.is_none());

    let listed: Vec<CabinetId> = cabinets.list().await?.into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![CabinetId::from("CAB-1"), CabinetId::from("CAB-2")]);

    let metadata = CabinetMetadata {
        firmware_version: Some("1.4.2".into()),
        ..CabinetMetadata::default()
    };
    assert!(cabinets.update_metadata(&"CAB-1".into(), &metadata).await?);
    assert!(!cabinets.update_metadata(&"CAB-9".into(), &metadata).await?);

    cabinets.touch_sync(&"CAB-1".into(), Timestamp::now()).await?;
    let stored = cabinets.get(&"CAB-1".into()).await?.unwrap();
    assert_eq!(stored.firmware_version.as_deref(), Some("1.4.2"));
    assert_eq!(stored.name.as_deref(), Some("cabinet CAB-1"));
    assert!(stored.last_sync_at.is_some());

    Ok(())
}

async fn command_transitions<C: CommandRegistry>(commands: &C) -> Result<(), C::Error> {
    let cmd = command("CAB-1");
    commands.insert(cmd.clone()).await?;

    // Acks cannot skip ahead of the publish
    assert!(!commands.transition(cmd.id, CommandStatus::Timeout, None, Timestamp::now()).await?);

    assert!(commands.transition(cmd.id, CommandStatus::Sent, None, Timestamp::now()).await?);
    let sent = commands.get(cmd.id).await?.unwrap();
    assert_eq!(sent.status, CommandStatus::Sent);
    assert!(sent.sent_at.is_some());
    assert!(sent.completed_at.is_none());

    assert!(
        commands
            .transition(cmd.id, CommandStatus::Success, Some("done".into()), Timestamp::now())
            .await?
    );
    // Terminal states never move again
    assert!(
        !commands
            .transition(cmd.id, CommandStatus::Failed, Some("late".into()), Timestamp::now())
            .await?
    );

    let done = commands.get(cmd.id).await?.unwrap();
    assert_eq!(done.status, CommandStatus::Success);
    assert_eq!(done.result.as_deref(), Some("done"));
    assert!(done.completed_at.is_some());
    assert_eq!(done.payload["verbose"], true);

    Ok(())
}

async fn command_expiry<C: CommandRegistry>(commands: &C) -> Result<(), C::Error> {
    let long_ago = Timestamp::now() - SignedDuration::from_secs(600);
    let stale = command("CAB-1");
    let fresh = command("CAB-1");
    let pending = command("CAB-1");
    for cmd in [&stale, &fresh, &pending] {
        commands.insert(cmd.clone()).await?;
    }
    commands.transition(stale.id, CommandStatus::Sent, None, long_ago).await?;
    commands.transition(fresh.id, CommandStatus::Sent, None, Timestamp::now()).await?;

    let cutoff = Timestamp::now() - SignedDuration::from_secs(300);
    let expired = commands.expire_sent(cutoff, Timestamp::now()).await?;
    assert_eq!(expired, vec![stale.id]);

    let stale = commands.get(stale.id).await?.unwrap();
    assert_eq!(stale.status, CommandStatus::Timeout);
    assert_eq!(stale.result.as_deref(), Some(TIMEOUT_RESULT));
    assert_eq!(commands.get(fresh.id).await?.unwrap().status, CommandStatus::Sent);
    assert_eq!(commands.get(pending.id).await?.unwrap().status, CommandStatus::Pending);

    // A late ack cannot revive a timed-out command
    assert!(!commands.transition(stale.id, CommandStatus::Success, None, Timestamp::now()).await?);

    let listed = commands.list_for_cabinet(&"CAB-1".into(), 2).await?;
    assert_eq!(listed.len(), 2);
    assert!(commands.list_for_cabinet(&"CAB-2".into(), 10).await?.is_empty());

    Ok(())
}

async fn alert_upsert<A: AlertRegistry>(alerts: &A) -> Result<(), A::Error> {
    let cabinet: CabinetId = "CAB-1".into();

    let first = alerts.upsert(&cabinet, &breach(Some(4), 60.0), Timestamp::now()).await?;
    // A report without an edge id keeps the one already known
    let second = alerts.upsert(&cabinet, &breach(None, 63.0), Timestamp::now()).await?;
    assert_eq!(second.id, first.id);
    assert_eq!(second.edge_alert_id, Some(EdgeAlertId(4)));
    assert_eq!(second.details["sensor_value"], 63.0);

    let open = alerts.list(&AlertFilter::default()).await?;
    assert_eq!(open.len(), 1);

    assert!(alerts.resolve(first.id, "operator-1", Timestamp::now()).await?);
    assert!(!alerts.resolve(first.id, "operator-2", Timestamp::now()).await?);

    // The edge confirming the resolution keeps the operator attribution
    let mut confirmed = breach(Some(4), 63.0);
    confirmed.resolved = true;
    let after = alerts.upsert(&cabinet, &confirmed, Timestamp::now()).await?;
    assert_eq!(after.resolved_by.as_deref(), Some("operator-1"));

    assert!(alerts.list(&AlertFilter::default()).await?.is_empty());
    let all = alerts
        .list(&AlertFilter {
            cabinet_id: Some(cabinet),
            include_resolved: true,
        })
        .await?;
    assert_eq!(all.len(), 1);

    Ok(())
}

/// Cabinets syncing at the same moment: each round races four reports for one
/// identity next to four reports for distinct devices.
async fn concurrent_alert_upsert<A: AlertRegistry>(alerts: &A) {
    let cabinet: CabinetId = "CAB-3".into();

    for round in 0..20 {
        let mut handles = Vec::new();
        for task in 0..8 {
            let alerts = alerts.clone();
            let cabinet = cabinet.clone();
            handles.push(tokio::spawn(async move {
                let mut report = breach(Some(round), 56.0 + task as f64);
                report.device_id = if task < 4 {
                    format!("shared-{round}")
                } else {
                    format!("own-{round}-{task}")
                };
                alerts.upsert(&cabinet, &report, Timestamp::now()).await
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await.unwrap() {
                panic!("round {round}: concurrent upsert failed: {e}");
            }
        }
    }

    let stored = alerts
        .list(&AlertFilter {
            cabinet_id: Some(cabinet),
            include_resolved: true,
        })
        .await
        .unwrap();
    // One shared record and four distinct ones per round
    assert_eq!(stored.len(), 20 * 5);
}

async fn policy_ledger<P: PolicyRegistry>(policies: &P) -> Result<(), P::Error> {
    policies.save_policy(device_policy("p-1"), Timestamp::now()).await?;
    policies
        .save_policy(
            PolicyDocument {
                subject_type: "user".into(),
                ..device_policy("p-2")
            },
            Timestamp::now(),
        )
        .await?;

    let device: Vec<PolicyId> = policies
        .device_policies()
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(device, vec![PolicyId("p-1".into())]);

    let policy_id = PolicyId("p-1".into());
    let pending = DistributionLogEntry::pending(
        policy_id.clone(),
        "CAB-1".into(),
        DistributionOperation::Distribute,
        "operator",
        Timestamp::now(),
    );
    let failed = DistributionLogEntry::pending(
        policy_id.clone(),
        "CAB-2".into(),
        DistributionOperation::Distribute,
        "operator",
        Timestamp::now(),
    );
    policies.record_distribution(pending.clone()).await?;
    policies.record_distribution(failed.clone()).await?;
    policies.fail_distribution(failed.id, "bus offline").await?;

    assert_eq!(policies.acknowledge(&policy_id, &"CAB-1".into(), Timestamp::now()).await?, 1);
    assert_eq!(policies.acknowledge(&policy_id, &"CAB-1".into(), Timestamp::now()).await?, 0);
    assert_eq!(policies.acknowledge(&policy_id, &"CAB-2".into(), Timestamp::now()).await?, 0);

    let entries = policies.distributions_for(&policy_id).await?;
    assert_eq!(entries.len(), 2);
    let acked = entries.iter().find(|e| e.id == pending.id).unwrap();
    assert_eq!(acked.status, DistributionStatus::Acknowledged);
    assert!(acked.acknowledged_at.is_some());
    let broken = entries.iter().find(|e| e.id == failed.id).unwrap();
    assert_eq!(broken.status, DistributionStatus::Failed);
    assert_eq!(broken.error_message.as_deref(), Some("bus offline"));

    Ok(())
}

async fn telemetry_dedup<T: TelemetryRegistry>(telemetry: &T) -> Result<(), T::Error> {
    let cabinet: CabinetId = "CAB-1".into();

    assert_eq!(telemetry.store_samples(&cabinet, &[sample(1), sample(2)], Timestamp::now()).await?, 2);
    assert_eq!(telemetry.store_samples(&cabinet, &[sample(2), sample(3)], Timestamp::now()).await?, 1);
    // Edge ids are only unique per cabinet
    assert_eq!(telemetry.store_samples(&"CAB-2".into(), &[sample(1)], Timestamp::now()).await?, 1);

    let log = AccessLogReport {
        id: AccessLogId(1),
        subject_type: "user".into(),
        subject_id: "operator-1".into(),
        action: "write".into(),
        resource: "pcs".into(),
        allowed: true,
        timestamp: Timestamp::now(),
    };
    assert_eq!(telemetry.store_access_logs(&cabinet, &[log.clone()]).await?, 1);
    assert_eq!(telemetry.store_access_logs(&cabinet, &[log]).await?, 0);

    let counts = telemetry.counts(&cabinet).await?;
    assert_eq!(counts.samples, 3);
    assert_eq!(counts.access_logs, 1);
    assert_eq!(counts.assessments, 0);
    assert!(telemetry.latest_assessment(&cabinet).await?.is_none());

    Ok(())
}

async fn all_scenarios<R: Registries>(registries: &R) {
    cabinet_lifecycle(registries.cabinets()).await.unwrap();
    command_transitions(registries.commands()).await.unwrap();
    command_expiry(registries.commands()).await.unwrap();
    alert_upsert(registries.alerts()).await.unwrap();
    policy_ledger(registries.policies()).await.unwrap();
    telemetry_dedup(registries.telemetry()).await.unwrap();
}

/// memory registry tests
#[tokio::test]
async fn memory_registries() {
    all_scenarios(&InMemoryRegistries::new()).await;
}

/// sqlite registry tests
#[tokio::test]
async fn sqlite_registries() -> Result<(), SqliteRegistryError> {
    let file = NamedTempFile::new().expect("temp file");
    let path = file.path().to_string_lossy().into_owned();
    let registries = SqliteRegistries::new(&path).await?;

    all_scenarios(&registries).await;
    Ok(())
}

#[tokio::test]
async fn memory_concurrent_alert_upsert() {
    concurrent_alert_upsert(&InMemoryRegistries::new().alerts).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_alert_upsert() -> Result<(), SqliteRegistryError> {
    let file = NamedTempFile::new().expect("temp file");
    let path = file.path().to_string_lossy().into_owned();
    let registries = SqliteRegistries::new(&path).await?;

    concurrent_alert_upsert(&registries.alerts).await;
    Ok(())
}

#[tokio::test]
async fn sqlite_registries_survive_reopen() -> Result<(), SqliteRegistryError> {
    let file = NamedTempFile::new().expect("temp file");
    let path = file.path().to_string_lossy().into_owned();

    let cmd = command("CAB-1");
    {
        let registries = SqliteRegistries::new(&path).await?;
        registries.cabinets.register(cabinet("CAB-1", "key-1")).await?;
        registries.commands.insert(cmd.clone()).await?;
        registries
            .commands
            .transition(cmd.id, CommandStatus::Sent, None, Timestamp::now())
            .await?;
    }

    let reopened = SqliteRegistries::new(&path).await?;
    assert!(reopened.cabinets.find_by_api_key("key-1").await?.is_some());
    let stored = reopened.commands.get(cmd.id).await?.unwrap();
    assert_eq!(stored.status, CommandStatus::Sent);
    assert_eq!(stored.command_type, CommandType::QueryStatus);

    Ok(())
}

#[tokio::test]
async fn sqlite_in_memory_registries() -> Result<(), SqliteRegistryError> {
    let registries = SqliteRegistries::new_in_memory().await?;
    all_scenarios(&registries).await;
    Ok(())
}
