//! End-to-end scenario over an in-memory mesh of coordinators.
//!
//! The first device owns the object, the last device writes it, and when
//! there are at least three devices the second one observes it. The run
//! fails if the write, the read-back at the owner or the notification does
//! not happen.

use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use objectstore_coordinator::network::mock::MemoryMesh;
use objectstore_coordinator::{
    CoordinateEngine, CoordinatorConfig, DataType, MessageType, ObjectObserver, ObjectValue,
    ObserverMode, OperationDispatcher,
};
use objectstore_storage::MemoryStorageEngine;
use objectstore_types::{DeviceId, FieldMap, ObjectKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Longest the scenario waits for an asynchronous effect.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fields written by the scenario.
pub const SAMPLE_FIELDS: [(&str, &str); 1] = [("name", "zhangsan")];

#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    pub devices: usize,
    pub object_name: String,
    pub config: CoordinatorConfig,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            devices: 3,
            object_name: "f".into(),
            config: CoordinatorConfig::for_app("objectstore-mesh"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScenarioReport {
    pub key: String,
    pub owner: String,
    pub writer: String,
    pub observer: Option<String>,
    /// Value read back at the owner, as UTF-8 (lossy).
    pub value: BTreeMap<String, String>,
    /// Messages delivered, by type.
    pub traffic: BTreeMap<String, usize>,
}

struct Device {
    id: DeviceId,
    engine: CoordinateEngine,
}

/// Logs every change and wakes the scenario.
struct LoggingObserver {
    device: DeviceId,
    changed: Notify,
}

#[async_trait]
impl ObjectObserver for LoggingObserver {
    async fn on_changed(&self, key: &ObjectKey) {
        info!(device = %self.device, key = %key, "observer: object changed");
        self.changed.notify_one();
    }

    async fn on_deleted(&self, key: &ObjectKey) {
        info!(device = %self.device, key = %key, "observer: object deleted");
    }
}

fn sample_fields() -> FieldMap {
    SAMPLE_FIELDS
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

fn printable(value: &ObjectValue) -> BTreeMap<String, String> {
    match value {
        ObjectValue::Map(map) => map
            .iter()
            .map(|(k, v)| {
                (
                    String::from_utf8_lossy(k).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect(),
    }
}

async fn build_mesh(mesh: &Arc<MemoryMesh>, options: &ScenarioOptions) -> Result<Vec<Device>> {
    let mut devices = Vec::with_capacity(options.devices);
    for index in 1..=options.devices {
        let id = DeviceId::new(format!("device-{index}")).context("invalid device id")?;
        let storage = Arc::new(
            MemoryStorageEngine::open_in_memory().context("failed to open storage")?,
        );
        let dispatcher = Arc::new(OperationDispatcher::with_map_storage(storage));
        let engine =
            CoordinateEngine::new(mesh.join(id.clone()), dispatcher, options.config.clone());
        engine
            .init()
            .await
            .with_context(|| format!("failed to start {id}"))?;
        devices.push(Device { id, engine });
    }
    Ok(devices)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Builds the mesh, runs the scenario and tears everything down.
pub async fn run(options: &ScenarioOptions) -> Result<ScenarioReport> {
    ensure!(options.devices >= 2, "need at least two devices, got {}", options.devices);
    let mesh = MemoryMesh::new();
    let devices = build_mesh(&mesh, options).await?;
    let result = drive(&mesh, &devices, options).await;
    for device in &devices {
        device.engine.destroy().await;
    }
    result
}

async fn drive(
    mesh: &Arc<MemoryMesh>,
    devices: &[Device],
    options: &ScenarioOptions,
) -> Result<ScenarioReport> {
    let (Some(owner), Some(writer)) = (devices.first(), devices.last()) else {
        bail!("empty mesh");
    };
    let key = ObjectKey::build(&owner.id, "0", "bundle", "store", &options.object_name);
    let expected = ObjectValue::Map(sample_fields());

    wait_for("peers to connect", || {
        owner.engine.remote_store_ids().len() == devices.len() - 1
    })
    .await?;

    let observer = match devices.get(1).filter(|_| devices.len() >= 3) {
        Some(device) => {
            let logger = Arc::new(LoggingObserver {
                device: device.id.clone(),
                changed: Notify::new(),
            });
            device
                .engine
                .add_observer(&key, logger.clone(), ObserverMode::DEFAULT)
                .context("failed to register observer")?;
            let remote = owner.engine.observer_manager().remote();
            wait_for("subscription at the owner", || {
                remote.subscribers(&key).contains(&device.id)
            })
            .await?;
            info!(device = %device.id, key = %key, "subscribed");
            Some((device, logger))
        }
        None => None,
    };

    info!(writer = %writer.id, owner = %owner.id, key = %key, "writing remote object");
    writer
        .engine
        .put(&key, expected.clone())
        .await
        .with_context(|| format!("put from {} failed", writer.id))?;

    let value = owner
        .engine
        .get(&key, DataType::Map)
        .await
        .context("read-back at owner failed")?;
    ensure!(value == expected, "owner holds {value:?}, expected {expected:?}");

    if let Some((device, logger)) = &observer {
        tokio::time::timeout(SETTLE_TIMEOUT, logger.changed.notified())
            .await
            .with_context(|| format!("{} was not notified", device.id))?;
        let cached = device
            .engine
            .get(&key, DataType::Map)
            .await
            .context("read at observer failed")?;
        ensure!(cached == expected, "observer holds {cached:?}");
    }

    let mut traffic = BTreeMap::new();
    for sent in mesh.sent() {
        *traffic.entry(format!("{:?}", sent.message_type)).or_insert(0) += 1;
    }
    debug!(?traffic, "mesh traffic");
    ensure!(
        mesh.sent_between(&writer.id, &owner.id, MessageType::PutRequest).len() == 1,
        "expected exactly one put request from writer to owner"
    );

    Ok(ScenarioReport {
        key: key.to_string(),
        owner: owner.id.to_string(),
        writer: writer.id.to_string(),
        observer: observer.map(|(device, _)| device.id.to_string()),
        value: printable(&value),
        traffic,
    })
}
