//! Observers registered on this device.
//!
//! Observing a key owned by another device also subscribes this device at
//! the owner. Subscription traffic runs on a background observe loop; change
//! delivery to observers runs on a separate notify loop so that a slow
//! observer never stalls message dispatch.

use crate::communicator::{Communicator, DeviceObserver, MessageHandler};
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::{Message, MessageType, Payload};
use crate::observer::{ObjectObserver, ObserverMode};
use crate::operation::{Operation, OperationKind};
use crate::sync;
use crate::waiter::WaiterTable;
use async_trait::async_trait;
use objectstore_types::{DeviceId, ObjectKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HANDLED: [MessageType; 3] = [
    MessageType::ObserveResponse,
    MessageType::PublishRequest,
    MessageType::PublishDeleteRequest,
];

#[derive(Default)]
struct ObservedKey {
    observers: Vec<(Arc<dyn ObjectObserver>, ObserverMode)>,
    changed: bool,
    deleted: bool,
}

impl ObservedKey {
    fn mode(&self) -> ObserverMode {
        self.observers
            .iter()
            .fold(ObserverMode::from_bits(0), |acc, (_, mode)| acc | *mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ObserveCommand {
    Add(ObjectKey, ObserverMode),
    Remove(ObjectKey),
}

struct Notification {
    key: ObjectKey,
    observers: Vec<Arc<dyn ObjectObserver>>,
    changed: bool,
    deleted: bool,
}

pub struct LocalObservers {
    communicator: Arc<Communicator>,
    dispatcher: Arc<OperationDispatcher>,
    objects: Mutex<BTreeMap<ObjectKey, ObservedKey>>,
    commands: Mutex<VecDeque<ObserveCommand>>,
    notify_wake: Notify,
    observe_wake: Notify,
    waiters: WaiterTable,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalObservers {
    pub fn new(communicator: Arc<Communicator>, dispatcher: Arc<OperationDispatcher>) -> Self {
        Self {
            communicator,
            dispatcher,
            objects: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(VecDeque::new()),
            notify_wake: Notify::new(),
            observe_wake: Notify::new(),
            waiters: WaiterTable::new(),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn init(self: &Arc<Self>) -> CoordinatorResult<()> {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .register_message_handler(message_type, handler.clone())?;
        }
        let observer: Weak<dyn DeviceObserver> = Arc::<Self>::downgrade(self);
        self.communicator.register_device_observer(observer)?;

        if !self.running.swap(true, Ordering::SeqCst) {
            let notify = Arc::clone(self);
            let observe = Arc::clone(self);
            let mut workers = sync::lock(&self.workers);
            workers.push(tokio::spawn(async move { notify.notify_loop().await }));
            workers.push(tokio::spawn(async move { observe.observe_loop().await }));
        }
        info!("local observers started");
        Ok(())
    }

    pub async fn destroy(self: &Arc<Self>) {
        let observer: Weak<dyn DeviceObserver> = Arc::<Self>::downgrade(self);
        self.communicator.unregister_device_observer(&observer);
        self.running.store(false, Ordering::SeqCst);
        self.notify_wake.notify_one();
        self.observe_wake.notify_one();
        let workers = std::mem::take(&mut *sync::lock(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("observer loop ended abnormally: {e}");
            }
        }
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .unregister_message_handler(message_type, &handler);
        }
        sync::lock(&self.commands).clear();
        info!("local observers stopped");
    }

    // ── Registration ────────────────────────────────────────────────

    /// Registers `observer` on `key`.
    ///
    /// Adding an observer that is already registered with the same mode
    /// fails with `AlreadyExists`; with a different mode the stored mode is
    /// replaced. The first observer of a remote key subscribes this device
    /// at the key's owner.
    pub fn add_observer(
        &self,
        key: &ObjectKey,
        observer: Arc<dyn ObjectObserver>,
        mode: ObserverMode,
    ) -> CoordinatorResult<()> {
        let remote = self.is_remote(key)?;
        let mut objects = sync::lock(&self.objects);
        let first = !objects.contains_key(key);
        let entry = objects.entry(key.clone()).or_default();
        match entry.observers.iter().position(|(o, _)| Arc::ptr_eq(o, &observer)) {
            Some(index) if entry.observers[index].1 == mode => {
                return Err(CoordinatorError::AlreadyExists(format!("observer on {key}")));
            }
            Some(index) => {
                debug!(key = %key, ?mode, "observer mode updated");
                entry.observers[index].1 = mode;
            }
            None => entry.observers.push((observer, mode)),
        }
        drop(objects);
        if remote && first {
            self.push_command(ObserveCommand::Add(key.clone(), mode));
        }
        Ok(())
    }

    /// Unregisters `observer` from `key`. Removing the last observer of a
    /// remote key unsubscribes at the owner.
    pub fn remove_observer(
        &self,
        key: &ObjectKey,
        observer: &Arc<dyn ObjectObserver>,
    ) -> CoordinatorResult<()> {
        let mut objects = sync::lock(&self.objects);
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| CoordinatorError::NotFound(format!("no observers on {key}")))?;
        let before = entry.observers.len();
        entry.observers.retain(|(o, _)| !Arc::ptr_eq(o, observer));
        if entry.observers.len() == before {
            return Err(CoordinatorError::NotFound(format!("observer on {key}")));
        }
        let emptied = entry.observers.is_empty();
        if emptied {
            objects.remove(key);
        }
        drop(objects);
        if emptied && self.is_remote(key)? {
            self.push_command(ObserveCommand::Remove(key.clone()));
        }
        Ok(())
    }

    pub fn observer_count(&self, key: &ObjectKey) -> usize {
        sync::lock(&self.objects)
            .get(key)
            .map_or(0, |entry| entry.observers.len())
    }

    /// Mode stored for `observer` on `key`.
    pub fn observer_mode(
        &self,
        key: &ObjectKey,
        observer: &Arc<dyn ObjectObserver>,
    ) -> Option<ObserverMode> {
        sync::lock(&self.objects).get(key).and_then(|entry| {
            entry
                .observers
                .iter()
                .find(|(o, _)| Arc::ptr_eq(o, observer))
                .map(|(_, mode)| *mode)
        })
    }

    /// Subscribes again to every observed remote key, with the combined
    /// mode of its observers.
    pub fn resubscribe(&self) {
        let commands: Vec<ObserveCommand> = sync::lock(&self.objects)
            .iter()
            .filter(|(key, _)| matches!(self.is_remote(key), Ok(true)))
            .map(|(key, entry)| ObserveCommand::Add(key.clone(), entry.mode()))
            .collect();
        if commands.is_empty() {
            return;
        }
        debug!(count = commands.len(), "resubscribing remote objects");
        sync::lock(&self.commands).extend(commands);
        self.observe_wake.notify_one();
    }

    // ── Publication ─────────────────────────────────────────────────

    /// Marks `key` changed. Observers hear about it on the next notify cycle.
    pub fn publish(&self, key: &ObjectKey) {
        if let Some(entry) = sync::lock(&self.objects).get_mut(key) {
            entry.changed = true;
            self.notify_wake.notify_one();
        }
    }

    /// Marks `key` deleted.
    pub fn publish_delete(&self, key: &ObjectKey) {
        if let Some(entry) = sync::lock(&self.objects).get_mut(key) {
            entry.deleted = true;
            self.notify_wake.notify_one();
        }
    }

    fn take_notifications(&self) -> Vec<Notification> {
        let mut objects = sync::lock(&self.objects);
        objects
            .iter_mut()
            .filter(|(_, entry)| entry.changed || entry.deleted)
            .map(|(key, entry)| {
                let notification = Notification {
                    key: key.clone(),
                    observers: entry.observers.iter().map(|(o, _)| Arc::clone(o)).collect(),
                    changed: entry.changed,
                    deleted: entry.deleted,
                };
                entry.changed = false;
                entry.deleted = false;
                notification
            })
            .collect()
    }

    async fn notify_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            for notification in self.take_notifications() {
                for observer in &notification.observers {
                    if notification.changed {
                        observer.on_changed(&notification.key).await;
                    }
                    if notification.deleted {
                        observer.on_deleted(&notification.key).await;
                    }
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.notify_wake.notified().await;
        }
        debug!("notify loop stopped");
    }

    // ── Subscription traffic ────────────────────────────────────────

    fn is_remote(&self, key: &ObjectKey) -> CoordinatorResult<bool> {
        let owner = key.require_owner()?;
        Ok(&owner != self.communicator.local_device_id())
    }

    fn push_command(&self, command: ObserveCommand) {
        sync::lock(&self.commands).push_back(command);
        self.observe_wake.notify_one();
    }

    async fn observe_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            loop {
                let command = sync::lock(&self.commands).pop_front();
                let Some(command) = command else {
                    break;
                };
                self.run_command(command).await;
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
            }
            self.observe_wake.notified().await;
        }
        debug!("observe loop stopped");
    }

    async fn run_command(&self, command: ObserveCommand) {
        let config = self.communicator.config();
        let limit = config.observe_retry_limit.max(1);
        let mut attempt = 1;
        loop {
            match self.send_command(&command).await {
                Ok(()) => return,
                Err(e)
                    if e.is_retryable()
                        && attempt < limit
                        && self.running.load(Ordering::SeqCst) =>
                {
                    warn!(?command, attempt, "observe request failed, retrying: {e}");
                    attempt += 1;
                    tokio::time::sleep(config.observe_retry_wait()).await;
                }
                Err(e) => {
                    warn!(?command, "dropping observe command: {e}");
                    return;
                }
            }
        }
    }

    async fn send_command(&self, command: &ObserveCommand) -> CoordinatorResult<()> {
        match command {
            ObserveCommand::Add(key, mode) => self.subscribe(key, *mode).await,
            ObserveCommand::Remove(key) => {
                let owner = owner_of(key)?;
                let request = Message::new(Payload::RemoveObserverRequest { key: key.clone() })
                    .with_id(self.waiters.next_id());
                self.communicator.send_message(&owner, request).await
            }
        }
    }

    /// Subscribes at the owner of `key` and, with `AUTO_GET`, caches the
    /// value it returns.
    async fn subscribe(&self, key: &ObjectKey, mode: ObserverMode) -> CoordinatorResult<()> {
        let owner = owner_of(key)?;
        let request = Message::new(Payload::ObserveRequest {
            key: key.clone(),
            mode: mode.bits(),
        });
        let response = self.communicator.request(&self.waiters, &owner, request).await?;
        let Payload::ObserveResponse { status, operation } = response.payload() else {
            return Err(CoordinatorError::InvalidMessage(format!(
                "unexpected observe reply {:?}",
                response.message_type()
            )));
        };
        CoordinatorError::check(*status)?;
        if mode.contains(ObserverMode::AUTO_GET) && !operation.is_empty() {
            Operation::decode_as(operation, OperationKind::Put)?.execute(&self.dispatcher)?;
        }
        info!(peer = %owner, key = %key, "observing remote object");
        Ok(())
    }

    /// Applies a change pushed by the owner of the key.
    fn apply_published(
        &self,
        source: Option<&DeviceId>,
        bytes: &[u8],
        kind: OperationKind,
    ) -> CoordinatorResult<()> {
        let operation = Operation::decode_as(bytes, kind)?;
        let key = operation.key();
        if source.is_none_or(|source| !key.is_owned_by(source)) {
            return Err(CoordinatorError::InvalidMessage(format!(
                "publish for {key} not sent by its owner"
            )));
        }
        operation.execute(&self.dispatcher)?;
        match kind {
            OperationKind::PublishDelete => self.publish_delete(key),
            _ => self.publish(key),
        }
        Ok(())
    }
}

fn owner_of(key: &ObjectKey) -> CoordinatorResult<DeviceId> {
    Ok(key.require_owner()?)
}

#[async_trait]
impl MessageHandler for LocalObservers {
    async fn on_new_message(&self, message: Arc<Message>) {
        let result = match message.payload() {
            Payload::ObserveResponse { .. } => {
                self.waiters.signal(Arc::clone(&message));
                return;
            }
            Payload::PublishRequest { operation } => {
                self.apply_published(message.source(), operation, OperationKind::Publish)
            }
            Payload::PublishDeleteRequest { operation } => {
                self.apply_published(message.source(), operation, OperationKind::PublishDelete)
            }
            _ => return,
        };
        if let Err(e) = result {
            warn!(
                source = ?message.source(),
                message_type = ?message.message_type(),
                "failed to apply publish: {e}"
            );
        }
    }
}

#[async_trait]
impl DeviceObserver for LocalObservers {
    async fn on_device_online(&self, device: &DeviceId) {
        debug!(peer = %device, "device online");
        self.resubscribe();
    }

    async fn on_device_offline(&self, device: &DeviceId) {
        debug!(peer = %device, "device offline");
    }
}
