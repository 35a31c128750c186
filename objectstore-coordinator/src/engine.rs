//! The coordination engine facade.

use crate::communicator::Communicator;
use crate::config::CoordinatorConfig;
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::network::Network;
use crate::observer::{ObjectObserver, ObserverMode};
use crate::observer_manager::ObserverManager;
use crate::operation::{DataType, ObjectValue};
use crate::task_manager::ObjectTaskManager;
use objectstore_types::{DeviceId, ObjectKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Put/Get/Delete/Publish/Observe surface for one device.
///
/// Owns one communicator, one observer manager and one task manager. The
/// caller constructs it once per device and shares it through an `Arc`.
pub struct CoordinateEngine {
    communicator: Arc<Communicator>,
    observers: Arc<ObserverManager>,
    tasks: ObjectTaskManager,
    lifecycle: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
}

impl CoordinateEngine {
    pub fn new(
        network: Arc<dyn Network>,
        dispatcher: Arc<OperationDispatcher>,
        config: CoordinatorConfig,
    ) -> Self {
        let communicator = Arc::new(Communicator::new(network, config));
        let observers = Arc::new(ObserverManager::new(
            Arc::clone(&communicator),
            Arc::clone(&dispatcher),
        ));
        let tasks = ObjectTaskManager::new(
            Arc::clone(&communicator),
            dispatcher,
            Arc::clone(&observers),
        );
        Self {
            communicator,
            observers,
            tasks,
            lifecycle: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Starts every subsystem. Calling it again after success is a no-op.
    ///
    /// Handlers are registered before the network starts, so no message that
    /// arrives early is lost. On failure everything started so far is torn
    /// down again.
    pub async fn init(&self) -> CoordinatorResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.communicator.init()?;
        if let Err(e) = self.start_subsystems().await {
            warn!(device = %self.local_device_id(), "engine init failed: {e}");
            self.teardown().await;
            return Err(e);
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!(device = %self.local_device_id(), "coordinate engine initialized");
        Ok(())
    }

    /// Stops every subsystem and joins their background tasks. Observers go
    /// first and the communicator last, so no loop outlives the bus it
    /// sends on.
    pub async fn destroy(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
        if self.initialized.swap(false, Ordering::SeqCst) {
            info!(device = %self.local_device_id(), "coordinate engine destroyed");
        }
    }

    async fn start_subsystems(&self) -> CoordinatorResult<()> {
        self.observers.init()?;
        self.tasks.init()?;
        self.communicator.start().await
    }

    async fn teardown(&self) {
        self.observers.destroy().await;
        self.tasks.destroy().await;
        self.communicator.destroy().await;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> CoordinatorResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoordinatorError::Init("engine not initialized".into()))
        }
    }

    // ── Objects ─────────────────────────────────────────────────────

    pub async fn put(
        &self,
        key: &ObjectKey,
        value: impl Into<ObjectValue>,
    ) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.tasks.put(key, value.into()).await
    }

    /// Like [`put`](Self::put) but returns once the write is queued.
    pub fn put_async(
        &self,
        key: &ObjectKey,
        value: impl Into<ObjectValue>,
    ) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.tasks.put_async(key, value.into())
    }

    pub async fn get(
        &self,
        key: &ObjectKey,
        data_type: DataType,
    ) -> CoordinatorResult<ObjectValue> {
        self.ensure_initialized()?;
        self.tasks.get(key, data_type).await
    }

    pub async fn delete(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.tasks.delete(key, data_type).await
    }

    /// Like [`delete`](Self::delete) but returns once the deletion is queued.
    pub fn delete_async(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.tasks.delete_async(key, data_type)
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Announces a change of `key` to its observers, local and remote.
    pub fn publish(&self, key: &ObjectKey, value: impl Into<ObjectValue>) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.observers.publish(key, value.into());
        Ok(())
    }

    pub fn publish_delete(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.observers.publish_delete(key, data_type);
        Ok(())
    }

    pub fn add_observer(
        &self,
        key: &ObjectKey,
        observer: Arc<dyn ObjectObserver>,
        mode: ObserverMode,
    ) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.observers.add_observer(key, observer, mode)
    }

    pub fn remove_observer(
        &self,
        key: &ObjectKey,
        observer: &Arc<dyn ObjectObserver>,
    ) -> CoordinatorResult<()> {
        self.ensure_initialized()?;
        self.observers.remove_observer(key, observer)
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn local_device_id(&self) -> &DeviceId {
        self.communicator.local_device_id()
    }

    /// Devices currently reachable.
    pub fn remote_store_ids(&self) -> Vec<DeviceId> {
        self.communicator.remote_store_ids()
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.communicator
    }

    pub fn observer_manager(&self) -> &Arc<ObserverManager> {
        &self.observers
    }

    pub fn task_manager(&self) -> &ObjectTaskManager {
        &self.tasks
    }
}
