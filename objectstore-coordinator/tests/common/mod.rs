#![allow(dead_code)]

use async_trait::async_trait;
use objectstore_coordinator::network::mock::{MemoryMesh, MemoryNetwork};
use objectstore_coordinator::{
    CoordinateEngine, CoordinatorConfig, ObjectObserver, OperationDispatcher,
};
use objectstore_storage::MemoryStorageEngine;
use objectstore_types::{DeviceId, FieldMap, ObjectKey};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn device(name: &str) -> DeviceId {
    DeviceId::new(name).unwrap()
}

/// `dataobject://<owner>/0/bundle/store/<name>`
pub fn key_on(owner: &str, name: &str) -> ObjectKey {
    ObjectKey::build(&device(owner), "0", "bundle", "store", name)
}

pub fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        request_timeout_ms: 2000,
        ..CoordinatorConfig::for_app("objectstore-test")
    }
}

/// One device of a test mesh.
pub struct Node {
    pub id: DeviceId,
    pub engine: Arc<CoordinateEngine>,
    pub storage: Arc<MemoryStorageEngine>,
    pub network: Arc<MemoryNetwork>,
}

impl Node {
    pub fn new(mesh: &Arc<MemoryMesh>, name: &str, config: CoordinatorConfig) -> Self {
        let id = device(name);
        let network = mesh.join(id.clone());
        let storage = Arc::new(MemoryStorageEngine::open_in_memory().unwrap());
        let dispatcher = Arc::new(OperationDispatcher::with_map_storage(storage.clone()));
        let engine = Arc::new(CoordinateEngine::new(network.clone(), dispatcher, config));
        Self {
            id,
            engine,
            storage,
            network,
        }
    }
}

/// Builds and initializes one engine per name on a fresh mesh.
pub async fn mesh(names: &[&str]) -> (Arc<MemoryMesh>, Vec<Node>) {
    mesh_with_config(names, test_config()).await
}

pub async fn mesh_with_config(
    names: &[&str],
    config: CoordinatorConfig,
) -> (Arc<MemoryMesh>, Vec<Node>) {
    init_tracing();
    let mesh = MemoryMesh::new();
    let mut nodes = Vec::new();
    for name in names {
        let node = Node::new(&mesh, name, config.clone());
        node.engine.init().await.unwrap();
        nodes.push(node);
    }
    // Let the online announcements settle.
    settle().await;
    (mesh, nodes)
}

pub async fn shutdown(nodes: &[Node]) {
    for node in nodes {
        node.engine.destroy().await;
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Observer that records every callback.
#[derive(Default)]
pub struct RecordingObserver {
    changed: Mutex<Vec<ObjectKey>>,
    deleted: Mutex<Vec<ObjectKey>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn changed(&self) -> Vec<ObjectKey> {
        self.changed.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<ObjectKey> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectObserver for RecordingObserver {
    async fn on_changed(&self, key: &ObjectKey) {
        self.changed.lock().unwrap().push(key.clone());
    }

    async fn on_deleted(&self, key: &ObjectKey) {
        self.deleted.lock().unwrap().push(key.clone());
    }
}
