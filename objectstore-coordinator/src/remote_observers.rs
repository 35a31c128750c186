//! Peers observing keys owned by this device.
//!
//! Each subscribing device gets a [`RemoteObserverProxy`] with its own task
//! that pushes changes to that device. A slow or unreachable subscriber
//! therefore only delays its own notifications.

use crate::communicator::{Communicator, MessageHandler};
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::{Message, MessageType, Payload};
use crate::observer::ObserverMode;
use crate::operation::{merge_pending, DataType, ObjectValue, Operation, OperationKind};
use crate::sync;
use crate::waiter::IdGenerator;
use async_trait::async_trait;
use futures::future::join_all;
use objectstore_types::{DeviceId, ObjectKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HANDLED: [MessageType; 2] = [
    MessageType::ObserveRequest,
    MessageType::RemoveObserverRequest,
];

struct Subject {
    mode: ObserverMode,
    /// Publish and PublishDelete operations in the order they happened.
    pending: VecDeque<Operation>,
}

/// Pushes changes of the keys one remote device observes to that device.
pub struct RemoteObserverProxy {
    device: DeviceId,
    communicator: Arc<Communicator>,
    ids: Arc<IdGenerator>,
    subjects: Mutex<BTreeMap<ObjectKey, Subject>>,
    wake: Notify,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteObserverProxy {
    pub fn new(device: DeviceId, communicator: Arc<Communicator>, ids: Arc<IdGenerator>) -> Self {
        Self {
            device,
            communicator,
            ids,
            subjects: Mutex::new(BTreeMap::new()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn start(self: &Arc<Self>) {
        if !self.running.swap(true, Ordering::SeqCst) {
            let proxy = Arc::clone(self);
            let worker = tokio::spawn(async move { proxy.notify_loop().await });
            *sync::lock(&self.worker) = Some(worker);
        }
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        let worker = sync::lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(peer = %self.device, "proxy loop ended abnormally: {e}");
            }
        }
    }

    /// Subscribes the device to `key`, or updates the mode of an existing
    /// subscription.
    pub fn add_subject(&self, key: &ObjectKey, mode: ObserverMode) {
        sync::lock(&self.subjects)
            .entry(key.clone())
            .and_modify(|subject| subject.mode = mode)
            .or_insert_with(|| Subject {
                mode,
                pending: VecDeque::new(),
            });
    }

    /// Drops the subscription to `key` along with its undelivered changes.
    pub fn remove_subject(&self, key: &ObjectKey) -> CoordinatorResult<()> {
        sync::lock(&self.subjects)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| {
                CoordinatorError::NotFound(format!("{} does not observe {key}", self.device))
            })
    }

    pub fn is_empty(&self) -> bool {
        sync::lock(&self.subjects).is_empty()
    }

    pub fn subject_mode(&self, key: &ObjectKey) -> Option<ObserverMode> {
        sync::lock(&self.subjects).get(key).map(|subject| subject.mode)
    }

    /// Number of changes not yet delivered.
    pub fn pending(&self) -> usize {
        sync::lock(&self.subjects)
            .values()
            .map(|subject| subject.pending.len())
            .sum()
    }

    /// Queues a change of `key` if the device observes it.
    pub fn publish(&self, key: &ObjectKey, value: &ObjectValue) -> bool {
        self.enqueue(Operation::publish(key.clone(), value.clone()))
    }

    /// Queues a deletion of `key` if the device observes it.
    pub fn publish_delete(&self, key: &ObjectKey, data_type: DataType) -> bool {
        self.enqueue(Operation::publish_delete(key.clone(), data_type))
    }

    fn enqueue(&self, operation: Operation) -> bool {
        let mut subjects = sync::lock(&self.subjects);
        let Some(subject) = subjects.get_mut(operation.key()) else {
            return false;
        };
        subject.pending.push_back(operation);
        drop(subjects);
        self.wake.notify_one();
        true
    }

    async fn notify_loop(self: Arc<Self>) {
        let period = self.communicator.config().task_loop_period();
        debug!(peer = %self.device, "proxy loop started");
        while self.running.load(Ordering::SeqCst) {
            let pending = self.drain_once().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if pending {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(period) => {}
                }
            } else {
                self.wake.notified().await;
            }
        }
        debug!(peer = %self.device, "proxy loop stopped");
    }

    async fn drain_once(&self) -> bool {
        let keys: Vec<ObjectKey> = sync::lock(&self.subjects).keys().cloned().collect();
        for key in keys {
            while self.running.load(Ordering::SeqCst) {
                let Some(head) = self.merged_head(&key) else {
                    break;
                };
                match self.send(&head).await {
                    Ok(()) => self.pop_head(&key),
                    Err(e) if e.is_retryable() => {
                        debug!(peer = %self.device, key = %key, "publish failed, retrying: {e}");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %self.device, key = %key, "dropping publish: {e}");
                        self.pop_head(&key);
                    }
                }
            }
        }
        sync::lock(&self.subjects)
            .values()
            .any(|subject| !subject.pending.is_empty())
    }

    fn merged_head(&self, key: &ObjectKey) -> Option<Operation> {
        let mut subjects = sync::lock(&self.subjects);
        let pending = &mut subjects.get_mut(key)?.pending;
        merge_pending(pending);
        pending.front().cloned()
    }

    fn pop_head(&self, key: &ObjectKey) {
        if let Some(subject) = sync::lock(&self.subjects).get_mut(key) {
            subject.pending.pop_front();
        }
    }

    async fn send(&self, operation: &Operation) -> CoordinatorResult<()> {
        let encoded = operation.encode()?;
        let payload = match operation.kind() {
            OperationKind::Publish => Payload::PublishRequest { operation: encoded },
            OperationKind::PublishDelete => Payload::PublishDeleteRequest { operation: encoded },
            other => {
                return Err(CoordinatorError::InvalidArgument(format!(
                    "{other:?} cannot be published"
                )));
            }
        };
        let message = Message::new(payload).with_id(self.ids.next_id());
        self.communicator.send_message(&self.device, message).await
    }
}

/// Registry of [`RemoteObserverProxy`]s, one per subscribing device.
pub struct RemoteObservers {
    communicator: Arc<Communicator>,
    dispatcher: Arc<OperationDispatcher>,
    ids: Arc<IdGenerator>,
    proxies: RwLock<BTreeMap<DeviceId, Arc<RemoteObserverProxy>>>,
}

impl RemoteObservers {
    pub fn new(communicator: Arc<Communicator>, dispatcher: Arc<OperationDispatcher>) -> Self {
        Self {
            communicator,
            dispatcher,
            ids: Arc::new(IdGenerator::new()),
            proxies: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn init(self: &Arc<Self>) -> CoordinatorResult<()> {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .register_message_handler(message_type, handler.clone())?;
        }
        info!("remote observers started");
        Ok(())
    }

    /// Unregisters and stops every proxy.
    pub async fn destroy(self: &Arc<Self>) {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .unregister_message_handler(message_type, &handler);
        }
        let proxies = std::mem::take(&mut *sync::write(&self.proxies));
        join_all(proxies.values().map(|proxy| proxy.stop())).await;
        info!("remote observers stopped");
    }

    pub fn publish(&self, key: &ObjectKey, value: &ObjectValue) {
        for proxy in self.snapshot() {
            proxy.publish(key, value);
        }
    }

    pub fn publish_delete(&self, key: &ObjectKey, data_type: DataType) {
        for proxy in self.snapshot() {
            proxy.publish_delete(key, data_type);
        }
    }

    /// Devices subscribed to `key`.
    pub fn subscribers(&self, key: &ObjectKey) -> Vec<DeviceId> {
        sync::read(&self.proxies)
            .values()
            .filter(|proxy| proxy.subject_mode(key).is_some())
            .map(|proxy| proxy.device().clone())
            .collect()
    }

    pub fn proxy(&self, device: &DeviceId) -> Option<Arc<RemoteObserverProxy>> {
        sync::read(&self.proxies).get(device).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<RemoteObserverProxy>> {
        sync::read(&self.proxies).values().cloned().collect()
    }

    /// Subscribes `device` to `key` and returns the current value encoded
    /// as a put.
    fn observe(
        &self,
        device: &DeviceId,
        key: &ObjectKey,
        mode: ObserverMode,
    ) -> CoordinatorResult<Vec<u8>> {
        if !key.is_owned_by(self.communicator.local_device_id()) {
            return Err(CoordinatorError::InvalidArgument(format!("{key} is not owned here")));
        }
        let value = self.dispatcher.get(DataType::Map, key)?;
        let current = Operation::put(key.clone(), value).encode()?;

        let mut proxies = sync::write(&self.proxies);
        let proxy = proxies.entry(device.clone()).or_insert_with(|| {
            info!(peer = %device, "new remote subscriber");
            Arc::new(RemoteObserverProxy::new(
                device.clone(),
                Arc::clone(&self.communicator),
                Arc::clone(&self.ids),
            ))
        });
        proxy.add_subject(key, mode);
        proxy.start();
        Ok(current)
    }

    /// Unsubscribes `device` from `key`. Returns the proxy when that left it
    /// with nothing to observe; the caller stops it.
    fn unobserve(
        &self,
        device: &DeviceId,
        key: &ObjectKey,
    ) -> CoordinatorResult<Option<Arc<RemoteObserverProxy>>> {
        let mut proxies = sync::write(&self.proxies);
        let proxy = proxies
            .get(device)
            .ok_or_else(|| CoordinatorError::NotFound(format!("{device} observes nothing")))?;
        proxy.remove_subject(key)?;
        if proxy.is_empty() {
            return Ok(proxies.remove(device));
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageHandler for RemoteObservers {
    async fn on_new_message(&self, message: Arc<Message>) {
        let Some(source) = message.source().cloned() else {
            warn!(message_type = ?message.message_type(), "observe message without source device");
            return;
        };
        match message.payload() {
            Payload::ObserveRequest { key, mode } => {
                let result = self.observe(&source, key, ObserverMode::from_bits(*mode));
                let status = CoordinatorError::status_of(&result);
                if let Err(e) = &result {
                    warn!(peer = %source, key = %key, "observe rejected: {e}");
                }
                let reply = Message::reply_to(
                    &message,
                    Payload::ObserveResponse {
                        status,
                        operation: result.unwrap_or_default(),
                    },
                );
                if let Err(e) = self.communicator.send_message(&source, reply).await {
                    warn!(peer = %source, "failed to send observe response: {e}");
                }
            }
            Payload::RemoveObserverRequest { key } => match self.unobserve(&source, key) {
                Ok(Some(proxy)) => {
                    info!(peer = %source, "last subscription removed");
                    proxy.stop().await;
                }
                Ok(None) => {}
                Err(e) => debug!(peer = %source, key = %key, "remove observer ignored: {e}"),
            },
            _ => {}
        }
    }
}
