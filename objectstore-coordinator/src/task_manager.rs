//! Routes object operations by the owner embedded in the key.

use crate::communicator::Communicator;
use crate::dispatcher::OperationDispatcher;
use crate::error::CoordinatorResult;
use crate::local_task::LocalObjectTask;
use crate::observer_manager::ObserverManager;
use crate::operation::{DataType, ObjectValue};
use crate::remote_task::RemoteObjectTask;
use objectstore_types::{DeviceId, ObjectKey};
use std::sync::Arc;

enum Route {
    Local,
    Remote(DeviceId),
}

/// Sends every operation to the local task or the remote task depending on
/// which device owns the key. Ownership comes from the key bytes alone.
pub struct ObjectTaskManager {
    local_device: DeviceId,
    local: Arc<LocalObjectTask>,
    remote: Arc<RemoteObjectTask>,
}

impl ObjectTaskManager {
    pub fn new(
        communicator: Arc<Communicator>,
        dispatcher: Arc<OperationDispatcher>,
        observers: Arc<ObserverManager>,
    ) -> Self {
        let local_device = communicator.local_device_id().clone();
        Self {
            local_device,
            local: Arc::new(LocalObjectTask::new(
                Arc::clone(&communicator),
                Arc::clone(&dispatcher),
                observers,
            )),
            remote: Arc::new(RemoteObjectTask::new(communicator, dispatcher)),
        }
    }

    pub fn init(&self) -> CoordinatorResult<()> {
        self.local.init()?;
        self.remote.init()
    }

    pub async fn destroy(&self) {
        self.local.destroy();
        self.remote.destroy().await;
    }

    pub fn remote_task(&self) -> &Arc<RemoteObjectTask> {
        &self.remote
    }

    fn route(&self, key: &ObjectKey) -> CoordinatorResult<Route> {
        let owner = key.require_owner()?;
        if owner == self.local_device {
            Ok(Route::Local)
        } else {
            Ok(Route::Remote(owner))
        }
    }

    pub async fn put(&self, key: &ObjectKey, value: ObjectValue) -> CoordinatorResult<()> {
        match self.route(key)? {
            Route::Local => self.local.put(key, value),
            Route::Remote(owner) => self.remote.put_remote(&owner, key, value).await,
        }
    }

    /// Queues a put. A locally owned key is written immediately.
    pub fn put_async(&self, key: &ObjectKey, value: ObjectValue) -> CoordinatorResult<()> {
        match self.route(key)? {
            Route::Local => self.local.put(key, value),
            Route::Remote(owner) => {
                self.remote.put_remote_async(&owner, key, value);
                Ok(())
            }
        }
    }

    pub async fn get(
        &self,
        key: &ObjectKey,
        data_type: DataType,
    ) -> CoordinatorResult<ObjectValue> {
        match self.route(key)? {
            Route::Local => self.local.get(key, data_type),
            Route::Remote(owner) => self.remote.get_remote(&owner, key, data_type).await,
        }
    }

    pub async fn delete(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        match self.route(key)? {
            Route::Local => self.local.delete(key, data_type),
            Route::Remote(owner) => self.remote.delete_remote(&owner, key, data_type).await,
        }
    }

    /// Queues a delete. A locally owned key is deleted immediately.
    pub fn delete_async(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        match self.route(key)? {
            Route::Local => self.local.delete(key, data_type),
            Route::Remote(owner) => {
                self.remote.delete_remote_async(&owner, key, data_type);
                Ok(())
            }
        }
    }
}
