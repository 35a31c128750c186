//! Entry point for observation: local observers and remote subscribers.

use crate::communicator::Communicator;
use crate::dispatcher::OperationDispatcher;
use crate::error::CoordinatorResult;
use crate::local_observers::LocalObservers;
use crate::observer::{ObjectObserver, ObserverMode};
use crate::operation::{DataType, ObjectValue};
use crate::remote_observers::RemoteObservers;
use objectstore_types::ObjectKey;
use std::sync::Arc;

pub struct ObserverManager {
    local: Arc<LocalObservers>,
    remote: Arc<RemoteObservers>,
}

impl ObserverManager {
    pub fn new(communicator: Arc<Communicator>, dispatcher: Arc<OperationDispatcher>) -> Self {
        Self {
            local: Arc::new(LocalObservers::new(
                Arc::clone(&communicator),
                Arc::clone(&dispatcher),
            )),
            remote: Arc::new(RemoteObservers::new(communicator, dispatcher)),
        }
    }

    pub fn init(&self) -> CoordinatorResult<()> {
        self.local.init()?;
        self.remote.init()
    }

    pub async fn destroy(&self) {
        self.local.destroy().await;
        self.remote.destroy().await;
    }

    pub fn local(&self) -> &Arc<LocalObservers> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<RemoteObservers> {
        &self.remote
    }

    pub fn add_observer(
        &self,
        key: &ObjectKey,
        observer: Arc<dyn ObjectObserver>,
        mode: ObserverMode,
    ) -> CoordinatorResult<()> {
        self.local.add_observer(key, observer, mode)
    }

    pub fn remove_observer(
        &self,
        key: &ObjectKey,
        observer: &Arc<dyn ObjectObserver>,
    ) -> CoordinatorResult<()> {
        self.local.remove_observer(key, observer)
    }

    /// Announces a change of `key` to local observers and remote subscribers.
    pub fn publish(&self, key: &ObjectKey, value: ObjectValue) {
        self.local.publish(key);
        self.remote.publish(key, &value);
    }

    /// Announces a deletion of `key` to local observers and remote
    /// subscribers.
    pub fn publish_delete(&self, key: &ObjectKey, data_type: DataType) {
        self.local.publish_delete(key);
        self.remote.publish_delete(key, data_type);
    }
}
