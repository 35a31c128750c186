mod common;

use async_trait::async_trait;
use common::{fields, key_on, mesh, shutdown, Node};
use objectstore_coordinator::network::mock::MemoryMesh;
use objectstore_coordinator::{
    CoordinatorConfig, CoordinatorError, DataType, Message, MessageType, Network, NetworkObserver,
    ObjectValue,
};
use objectstore_storage::StorageEngine;
use objectstore_types::{DeviceId, ObjectKey};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn init_is_idempotent() {
    let mesh = MemoryMesh::new();
    let node = Node::new(&mesh, "A", common::test_config());
    node.engine.init().await.unwrap();
    node.engine.init().await.unwrap();
    assert!(node.engine.is_initialized());
    node.engine.destroy().await;
    assert!(!node.engine.is_initialized());
}

#[tokio::test]
async fn init_requires_app_name() {
    let mesh = MemoryMesh::new();
    let node = Node::new(&mesh, "A", CoordinatorConfig::default());
    let err = node.engine.init().await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    assert!(!node.engine.is_initialized());
}

#[tokio::test]
async fn operations_before_init_fail() {
    let mesh = MemoryMesh::new();
    let node = Node::new(&mesh, "A", common::test_config());
    let key = key_on("A", "f");
    let err = node.engine.put(&key, fields(&[("a", "1")])).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Init(_)));
    assert!(node.engine.put_async(&key, fields(&[("a", "1")])).is_err());
}

#[tokio::test]
async fn destroy_without_init_is_safe() {
    let mesh = MemoryMesh::new();
    let node = Node::new(&mesh, "A", common::test_config());
    node.engine.destroy().await;
    node.engine.destroy().await;
    assert!(!node.engine.is_initialized());
}

#[tokio::test]
async fn engine_can_restart_after_destroy() {
    let (_mesh, nodes) = mesh(&["A", "B"]).await;
    nodes[1].engine.destroy().await;
    nodes[1].engine.init().await.unwrap();
    common::settle().await;

    let key = key_on("A", "f");
    nodes[1].engine.put(&key, fields(&[("a", "1")])).await.unwrap();
    assert_eq!(nodes[0].storage.get_hash(&key).unwrap(), fields(&[("a", "1")]));
    shutdown(&nodes).await;
}

#[tokio::test]
async fn reports_local_and_remote_ids() {
    let (_mesh, nodes) = mesh(&["A", "B", "C"]).await;
    assert_eq!(nodes[0].engine.local_device_id(), &common::device("A"));
    assert_eq!(
        nodes[0].engine.remote_store_ids(),
        vec![common::device("B"), common::device("C")]
    );
    shutdown(&nodes).await;
}

// ── Local keys ───────────────────────────────────────────────────

#[tokio::test]
async fn local_put_get_delete() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let a = &nodes[0];
    let key = key_on("A", "local");

    a.engine.put(&key, fields(&[("x", "1")])).await.unwrap();
    a.engine.put(&key, fields(&[("y", "2")])).await.unwrap();
    let value = a.engine.get(&key, DataType::Map).await.unwrap();
    assert_eq!(value, ObjectValue::Map(fields(&[("x", "1"), ("y", "2")])));

    a.engine.delete(&key, DataType::Map).await.unwrap();
    assert!(a.engine.get(&key, DataType::Map).await.unwrap().is_empty());

    // Nothing left the device.
    assert!(mesh.sent().iter().all(|m| m.message_type != MessageType::PutRequest));
    shutdown(&nodes).await;
}

#[tokio::test]
async fn key_without_owner_is_rejected() {
    let (_mesh, nodes) = mesh(&["A"]).await;
    let err = nodes[0]
        .engine
        .put(&ObjectKey::from("not-a-key"), fields(&[("a", "1")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::InvalidArgument(ref msg) if msg.starts_with("invalid object key")
    ));
    shutdown(&nodes).await;
}

// ── Remote keys ──────────────────────────────────────────────────

#[tokio::test]
async fn remote_put_reaches_owner() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = ObjectKey::from("dataobject://A/0/bundle/store/f");

    b.engine.put(&key, fields(&[("name", "zhangsan")])).await.unwrap();

    assert_eq!(a.storage.get_hash(&key).unwrap(), fields(&[("name", "zhangsan")]));
    assert!(b.storage.get_hash(&key).unwrap().is_empty());
    assert_eq!(mesh.sent_between(&b.id, &a.id, MessageType::PutRequest).len(), 1);
    assert_eq!(mesh.sent_between(&a.id, &b.id, MessageType::PutResponse).len(), 1);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn remote_get_fetches_then_serves_from_cache() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "doc");
    a.engine.put(&key, fields(&[("title", "hello")])).await.unwrap();

    let first = b.engine.get(&key, DataType::Map).await.unwrap();
    assert_eq!(first, ObjectValue::Map(fields(&[("title", "hello")])));
    assert_eq!(b.storage.get_hash(&key).unwrap(), fields(&[("title", "hello")]));

    let second = b.engine.get(&key, DataType::Map).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(mesh.sent_between(&b.id, &a.id, MessageType::GetRequest).len(), 1);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn remote_get_of_missing_object_is_empty() {
    let (_mesh, nodes) = mesh(&["A", "B"]).await;
    let value = nodes[1]
        .engine
        .get(&key_on("A", "missing"), DataType::Map)
        .await
        .unwrap();
    assert!(value.is_empty());
    shutdown(&nodes).await;
}

#[tokio::test]
async fn remote_delete_removes_at_owner() {
    let (_mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "gone");
    a.engine.put(&key, fields(&[("a", "1")])).await.unwrap();

    b.engine.delete(&key, DataType::Map).await.unwrap();
    assert!(a.storage.get_hash(&key).unwrap().is_empty());
    shutdown(&nodes).await;
}

#[tokio::test]
async fn remote_failure_status_is_surfaced() {
    let (_mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    a.storage.close().unwrap();

    let err = b
        .engine
        .put(&key_on("A", "f"), fields(&[("a", "1")]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Storage(_)));
    assert!(!err.is_retryable());
    shutdown(&nodes).await;
}

#[tokio::test]
async fn unreachable_owner_is_a_network_error() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    mesh.sever(&a.id, &b.id);

    let err = b
        .engine
        .put(&key_on("A", "f"), fields(&[("a", "1")]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Network(_)));
    assert!(err.is_retryable());
    shutdown(&nodes).await;
}

#[tokio::test]
async fn silent_owner_times_out() {
    let config = CoordinatorConfig {
        request_timeout_ms: 50,
        ..common::test_config()
    };
    let mesh = MemoryMesh::new();

    // A is on the mesh but never answers anything.
    let silent = mesh.join(common::device("A"));
    let observer: Arc<dyn NetworkObserver> = Arc::new(Silent);
    silent.start(Arc::downgrade(&observer)).await.unwrap();

    let b = Node::new(&mesh, "B", config);
    b.engine.init().await.unwrap();
    common::settle().await;

    let err = b
        .engine
        .put(&key_on("A", "f"), fields(&[("a", "1")]))
        .await
        .unwrap_err();
    assert_eq!(err, CoordinatorError::Timeout);
    assert_eq!(mesh.sent_between(&b.id, &common::device("A"), MessageType::PutRequest).len(), 1);

    b.engine.destroy().await;
    silent.stop().await.unwrap();
}

struct Silent;

#[async_trait]
impl NetworkObserver for Silent {
    async fn on_node_online(&self, _device: &DeviceId) {}
    async fn on_node_offline(&self, _device: &DeviceId) {}
    async fn on_new_message(&self, _message: Message) {}
}

// ── Asynchronous writes ──────────────────────────────────────────

#[tokio::test]
async fn queued_puts_merge_into_one_request() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "merged");

    b.engine.put_async(&key, fields(&[("a", "1")])).unwrap();
    b.engine.put_async(&key, fields(&[("b", "2")])).unwrap();
    b.engine.put_async(&key, fields(&[("a", "3")])).unwrap();

    let remote = b.engine.task_manager().remote_task().clone();
    assert!(common::eventually(|| remote.queued() == 0).await);
    assert_eq!(a.storage.get_hash(&key).unwrap(), fields(&[("a", "3"), ("b", "2")]));
    assert_eq!(mesh.sent_between(&b.id, &a.id, MessageType::PutRequest).len(), 1);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn queued_put_then_delete_keeps_order() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "ordered");

    b.engine.put_async(&key, fields(&[("a", "1")])).unwrap();
    b.engine.delete_async(&key, DataType::Map).unwrap();

    let remote = b.engine.task_manager().remote_task().clone();
    assert!(common::eventually(|| remote.queued() == 0).await);
    assert!(a.storage.get_hash(&key).unwrap().is_empty());
    assert_eq!(mesh.sent_between(&b.id, &a.id, MessageType::PutRequest).len(), 1);
    assert_eq!(mesh.sent_between(&b.id, &a.id, MessageType::DeleteRequest).len(), 1);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn queued_put_survives_partition() {
    let (mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "later");
    mesh.sever(&a.id, &b.id);

    b.engine.put_async(&key, fields(&[("a", "1")])).unwrap();
    common::settle().await;
    assert_eq!(b.engine.task_manager().remote_task().queued(), 1);

    mesh.heal(&a.id, &b.id);
    let expected = fields(&[("a", "1")]);
    assert!(common::eventually(|| a.storage.get_hash(&key).unwrap() == expected).await);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn queued_put_survives_owner_failure() {
    let (_mesh, nodes) = mesh(&["A", "B"]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let key = key_on("A", "later");
    a.storage.close().unwrap();

    b.engine.put_async(&key, fields(&[("a", "1")])).unwrap();
    common::settle().await;
    assert_eq!(b.engine.task_manager().remote_task().queued(), 1);

    a.storage.open().unwrap();
    let expected = fields(&[("a", "1")]);
    assert!(common::eventually(|| a.storage.get_hash(&key).unwrap() == expected).await);
    assert!(common::eventually(|| b.engine.task_manager().remote_task().queued() == 0).await);
    shutdown(&nodes).await;
}

#[tokio::test]
async fn async_put_on_local_key_applies_immediately() {
    let (_mesh, nodes) = mesh(&["A"]).await;
    let key = key_on("A", "now");
    nodes[0].engine.put_async(&key, fields(&[("a", "1")])).unwrap();
    assert_eq!(nodes[0].storage.get_hash(&key).unwrap(), fields(&[("a", "1")]));
    shutdown(&nodes).await;
}
