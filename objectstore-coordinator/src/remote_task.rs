//! Client side for keys owned by other devices.
//!
//! The synchronous path sends a request and waits for the correlated
//! response. The asynchronous path queues operations per (device, key) and
//! lets one background loop drain them, merging adjacent entries first so
//! that a burst of writes to one key costs a single request.

use crate::communicator::{Communicator, MessageHandler};
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::{Message, MessageType, Payload};
use crate::operation::{merge_pending, DataType, ObjectValue, Operation, OperationKind};
use crate::sync;
use crate::waiter::WaiterTable;
use async_trait::async_trait;
use objectstore_types::{DeviceId, ObjectKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const HANDLED: [MessageType; 3] = [
    MessageType::PutResponse,
    MessageType::GetResponse,
    MessageType::DeleteResponse,
];

type PendingQueues = BTreeMap<DeviceId, BTreeMap<ObjectKey, VecDeque<Operation>>>;

/// Forwards operations on remotely owned keys to their owner.
pub struct RemoteObjectTask {
    communicator: Arc<Communicator>,
    dispatcher: Arc<OperationDispatcher>,
    waiters: WaiterTable,
    queues: Mutex<PendingQueues>,
    wake: Notify,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteObjectTask {
    pub fn new(communicator: Arc<Communicator>, dispatcher: Arc<OperationDispatcher>) -> Self {
        Self {
            communicator,
            dispatcher,
            waiters: WaiterTable::new(),
            queues: Mutex::new(BTreeMap::new()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Registers response handlers and starts the drain loop.
    pub fn init(self: &Arc<Self>) -> CoordinatorResult<()> {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .register_message_handler(message_type, handler.clone())?;
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            let task = Arc::clone(self);
            *sync::lock(&self.worker) = Some(tokio::spawn(async move { task.drain_loop().await }));
        }
        Ok(())
    }

    /// Stops the drain loop and waits for it. Queued operations are dropped.
    pub async fn destroy(self: &Arc<Self>) {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .unregister_message_handler(message_type, &handler);
        }
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        let worker = sync::lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("remote task loop ended abnormally: {e}");
            }
        }
        let dropped: usize = std::mem::take(&mut *sync::lock(&self.queues))
            .values()
            .flat_map(|keys| keys.values())
            .map(VecDeque::len)
            .sum();
        if dropped > 0 {
            warn!(dropped, "discarding queued remote operations");
        }
    }

    // ── Synchronous path ────────────────────────────────────────────

    pub async fn put_remote(
        &self,
        owner: &DeviceId,
        key: &ObjectKey,
        value: ObjectValue,
    ) -> CoordinatorResult<()> {
        self.send_operation(owner, &Operation::put(key.clone(), value))
            .await
            .map(|_| ())
    }

    /// Returns the locally cached value when there is one, otherwise fetches
    /// it from `owner` and caches it.
    pub async fn get_remote(
        &self,
        owner: &DeviceId,
        key: &ObjectKey,
        data_type: DataType,
    ) -> CoordinatorResult<ObjectValue> {
        match self.dispatcher.get(data_type, key) {
            Ok(value) if !value.is_empty() => return Ok(value),
            Ok(_) => {}
            Err(e) => debug!(key = %key, "local read failed, fetching: {e}"),
        }
        let response = self
            .send_operation(owner, &Operation::get(key.clone(), data_type))
            .await?;
        if let Payload::GetResponse { operation, .. } = response.payload() {
            let fetched = Operation::decode_as(operation, OperationKind::Put)?;
            if fetched.key() != key {
                return Err(CoordinatorError::InvalidMessage(
                    "get response for another key".into(),
                ));
            }
            fetched.execute(&self.dispatcher)?;
        }
        self.dispatcher.get(data_type, key)
    }

    pub async fn delete_remote(
        &self,
        owner: &DeviceId,
        key: &ObjectKey,
        data_type: DataType,
    ) -> CoordinatorResult<()> {
        self.send_operation(owner, &Operation::delete(key.clone(), data_type))
            .await
            .map(|_| ())
    }

    // ── Asynchronous path ───────────────────────────────────────────

    /// Queues a put for the drain loop.
    pub fn put_remote_async(&self, owner: &DeviceId, key: &ObjectKey, value: ObjectValue) {
        self.enqueue(owner, Operation::put(key.clone(), value));
    }

    /// Queues a delete for the drain loop.
    pub fn delete_remote_async(&self, owner: &DeviceId, key: &ObjectKey, data_type: DataType) {
        self.enqueue(owner, Operation::delete(key.clone(), data_type));
    }

    /// Number of operations waiting to be sent.
    pub fn queued(&self) -> usize {
        sync::lock(&self.queues)
            .values()
            .flat_map(|keys| keys.values())
            .map(VecDeque::len)
            .sum()
    }

    fn enqueue(&self, owner: &DeviceId, operation: Operation) {
        sync::lock(&self.queues)
            .entry(owner.clone())
            .or_default()
            .entry(operation.key().clone())
            .or_default()
            .push_back(operation);
        self.wake.notify_one();
    }

    async fn drain_loop(self: Arc<Self>) {
        let period = self.communicator.config().task_loop_period();
        debug!("remote task loop started");
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
        debug!("remote task loop stopped");
    }

    /// One pass over every queue. Returns whether work is left over.
    async fn drain_once(&self) -> bool {
        let targets: Vec<(DeviceId, ObjectKey)> = sync::lock(&self.queues)
            .iter()
            .flat_map(|(device, keys)| keys.keys().map(move |key| (device.clone(), key.clone())))
            .collect();

        for (device, key) in targets {
            while self.running.load(Ordering::SeqCst) {
                let Some(head) = self.merged_head(&device, &key) else {
                    break;
                };
                let (request, expected) = match Self::request_for(&head) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(
                            peer = %device,
                            key = %key,
                            kind = ?head.kind(),
                            "dropping unencodable operation: {e}"
                        );
                        self.pop_head(&device, &key);
                        continue;
                    }
                };
                match self.send_request(&device, request, expected).await {
                    Ok(_) => self.pop_head(&device, &key),
                    Err(e) => {
                        debug!(
                            peer = %device,
                            key = %key,
                            retryable = e.is_retryable(),
                            "send failed, keeping queued: {e}"
                        );
                        break;
                    }
                }
            }
        }

        let mut queues = sync::lock(&self.queues);
        queues.retain(|_, keys| {
            keys.retain(|_, queue| !queue.is_empty());
            !keys.is_empty()
        });
        !queues.is_empty()
    }

    /// Folds every mergeable successor into the head of the queue and
    /// returns a copy of the head.
    fn merged_head(&self, device: &DeviceId, key: &ObjectKey) -> Option<Operation> {
        let mut queues = sync::lock(&self.queues);
        let queue = queues.get_mut(device)?.get_mut(key)?;
        merge_pending(queue);
        queue.front().cloned()
    }

    fn pop_head(&self, device: &DeviceId, key: &ObjectKey) {
        if let Some(queue) = sync::lock(&self.queues)
            .get_mut(device)
            .and_then(|keys| keys.get_mut(key))
        {
            queue.pop_front();
        }
    }

    /// Sends `operation` to `owner` and checks the response status.
    async fn send_operation(
        &self,
        owner: &DeviceId,
        operation: &Operation,
    ) -> CoordinatorResult<Arc<Message>> {
        let (request, expected) = Self::request_for(operation)?;
        self.send_request(owner, request, expected).await
    }

    /// Request payload for `operation` and the response type it expects.
    fn request_for(operation: &Operation) -> CoordinatorResult<(Payload, MessageType)> {
        let encoded = operation.encode()?;
        match operation.kind() {
            OperationKind::Put => Ok((
                Payload::PutRequest { operation: encoded },
                MessageType::PutResponse,
            )),
            OperationKind::Get => Ok((
                Payload::GetRequest { operation: encoded },
                MessageType::GetResponse,
            )),
            OperationKind::Delete => Ok((
                Payload::DeleteRequest { operation: encoded },
                MessageType::DeleteResponse,
            )),
            other => Err(CoordinatorError::InvalidArgument(format!(
                "{other:?} is not a remote task operation"
            ))),
        }
    }

    async fn send_request(
        &self,
        owner: &DeviceId,
        request: Payload,
        expected: MessageType,
    ) -> CoordinatorResult<Arc<Message>> {
        let response = self
            .communicator
            .request(&self.waiters, owner, Message::new(request))
            .await?;
        if response.message_type() != expected {
            return Err(CoordinatorError::InvalidMessage(format!(
                "expected {expected:?}, got {:?}",
                response.message_type()
            )));
        }
        let status = match response.payload() {
            Payload::PutResponse { status }
            | Payload::DeleteResponse { status }
            | Payload::GetResponse { status, .. } => *status,
            other => {
                return Err(CoordinatorError::InvalidMessage(format!(
                    "unexpected payload {:?}",
                    other.message_type()
                )));
            }
        };
        CoordinatorError::check(status)?;
        Ok(response)
    }
}

#[async_trait]
impl MessageHandler for RemoteObjectTask {
    async fn on_new_message(&self, message: Arc<Message>) {
        self.waiters.signal(message);
    }
}
