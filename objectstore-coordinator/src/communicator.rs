//! Message bus between the coordinator subsystems and the [`Network`].
//!
//! Inbound messages are routed to every handler registered for their type.
//! The registry is copied under a read lock and released before any handler
//! runs, so a handler may register or unregister handlers while it is being
//! invoked. Registries hold [`Weak`] handles; a handler that has been dropped
//! is skipped and pruned.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::{Handshake, Message, MessageType, Payload};
use crate::network::{Network, NetworkObserver};
use crate::sync;
use crate::waiter::WaiterTable;
use async_trait::async_trait;
use objectstore_types::DeviceId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info, warn};

/// Receives inbound messages of the types it registered for.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_new_message(&self, message: Arc<Message>);
}

/// Receives peer reachability changes.
#[async_trait]
pub trait DeviceObserver: Send + Sync {
    async fn on_device_online(&self, device: &DeviceId);

    async fn on_device_offline(&self, device: &DeviceId);
}

type HandlerMap = HashMap<MessageType, Vec<Weak<dyn MessageHandler>>>;

/// Transport-agnostic message bus over a [`Network`].
pub struct Communicator {
    network: Arc<dyn Network>,
    local: DeviceId,
    config: CoordinatorConfig,
    handlers: RwLock<HandlerMap>,
    device_observers: RwLock<Vec<Weak<dyn DeviceObserver>>>,
    sessions: Mutex<HashSet<DeviceId>>,
    handshakes: WaiterTable,
    started: AtomicBool,
}

impl Communicator {
    pub fn new(network: Arc<dyn Network>, config: CoordinatorConfig) -> Self {
        let local = network.local_device_id();
        Self {
            network,
            local,
            config,
            handlers: RwLock::new(HashMap::new()),
            device_observers: RwLock::new(Vec::new()),
            sessions: Mutex::new(HashSet::new()),
            handshakes: WaiterTable::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Validates the configuration. Must precede [`start`](Self::start).
    pub fn init(&self) -> CoordinatorResult<()> {
        if self.config.app_name.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "app_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Starts receiving from the network. Handlers should be registered
    /// first so that no early message goes undelivered.
    pub async fn start(self: &Arc<Self>) -> CoordinatorResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let observer: Weak<dyn NetworkObserver> = Arc::<Self>::downgrade(self);
        if let Err(e) = self.network.start(observer).await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(device = %self.local, app = %self.config.app_name, "communicator started");
        Ok(())
    }

    /// Stops the network and forgets every handler, observer and session.
    pub async fn destroy(&self) {
        sync::write(&self.handlers).clear();
        sync::write(&self.device_observers).clear();
        sync::lock(&self.sessions).clear();
        if self.started.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.network.stop().await {
                warn!(device = %self.local, "network stop failed: {e}");
            }
            info!(device = %self.local, "communicator stopped");
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn local_device_id(&self) -> &DeviceId {
        &self.local
    }

    /// Peers the network can currently reach.
    pub fn remote_store_ids(&self) -> Vec<DeviceId> {
        self.network.remote_devices()
    }

    // ── Registration ────────────────────────────────────────────────

    /// Registers `handler` for `message_type`. Registering the same handler
    /// twice is a no-op.
    pub fn register_message_handler(
        &self,
        message_type: MessageType,
        handler: Weak<dyn MessageHandler>,
    ) -> CoordinatorResult<()> {
        if handler.strong_count() == 0 {
            return Err(CoordinatorError::InvalidArgument("dangling message handler".into()));
        }
        let mut handlers = sync::write(&self.handlers);
        let entry = handlers.entry(message_type).or_default();
        entry.retain(|h| h.strong_count() > 0);
        if !entry.iter().any(|h| Weak::ptr_eq(h, &handler)) {
            entry.push(handler);
        }
        Ok(())
    }

    pub fn unregister_message_handler(
        &self,
        message_type: MessageType,
        handler: &Weak<dyn MessageHandler>,
    ) {
        let mut handlers = sync::write(&self.handlers);
        if let Some(entry) = handlers.get_mut(&message_type) {
            entry.retain(|h| h.strong_count() > 0 && !Weak::ptr_eq(h, handler));
            if entry.is_empty() {
                handlers.remove(&message_type);
            }
        }
    }

    pub fn handler_count(&self, message_type: MessageType) -> usize {
        sync::read(&self.handlers)
            .get(&message_type)
            .map_or(0, |entry| entry.iter().filter(|h| h.strong_count() > 0).count())
    }

    pub fn register_device_observer(
        &self,
        observer: Weak<dyn DeviceObserver>,
    ) -> CoordinatorResult<()> {
        if observer.strong_count() == 0 {
            return Err(CoordinatorError::InvalidArgument("dangling device observer".into()));
        }
        let mut observers = sync::write(&self.device_observers);
        observers.retain(|o| o.strong_count() > 0);
        if !observers.iter().any(|o| Weak::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
        Ok(())
    }

    pub fn unregister_device_observer(&self, observer: &Weak<dyn DeviceObserver>) {
        sync::write(&self.device_observers)
            .retain(|o| o.strong_count() > 0 && !Weak::ptr_eq(o, observer));
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Stamps the local device id on `message` and sends it to `target`,
    /// opening a session first if none is open.
    pub async fn send_message(
        &self,
        target: &DeviceId,
        mut message: Message,
    ) -> CoordinatorResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Init("communicator not started".into()));
        }
        message.set_source(self.local.clone());
        let has_session = sync::lock(&self.sessions).contains(target);
        if !has_session {
            self.network.open_session(target).await?;
            sync::lock(&self.sessions).insert(target.clone());
            debug!(peer = %target, "session opened");
        }
        self.network.send_message(target, &message).await
    }

    /// Sends `message` under a fresh id from `waiters` and waits for the
    /// correlated response. The waiter is registered before the send and
    /// removed on every exit path.
    pub async fn request(
        &self,
        waiters: &WaiterTable,
        target: &DeviceId,
        message: Message,
    ) -> CoordinatorResult<Arc<Message>> {
        let pending = waiters.register()?;
        let message = message.with_id(pending.id());
        let message_type = message.message_type();
        self.send_message(target, message).await?;
        let response = pending.wait(self.config.request_timeout()).await;
        if let Err(e) = &response {
            debug!(peer = %target, ?message_type, id = pending.id(), "request failed: {e}");
        }
        response
    }

    /// Exchanges identities with `peer`.
    pub async fn handshake(&self, peer: &DeviceId) -> CoordinatorResult<Handshake> {
        let request = Message::new(Payload::HandshakeRequest(self.local_handshake()));
        let response = self.request(&self.handshakes, peer, request).await?;
        match response.payload() {
            Payload::HandshakeResponse(handshake) => Ok(handshake.clone()),
            other => Err(CoordinatorError::InvalidMessage(format!(
                "unexpected handshake reply {:?}",
                other.message_type()
            ))),
        }
    }

    fn local_handshake(&self) -> Handshake {
        Handshake {
            device_id: self.local.clone(),
            network_id: self.config.app_name.clone(),
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    async fn on_handshake(&self, message: Arc<Message>) {
        match message.payload() {
            Payload::HandshakeRequest(remote) => {
                if remote.network_id != self.config.app_name {
                    warn!(
                        peer = %remote.device_id,
                        network = %remote.network_id,
                        "handshake from another network"
                    );
                }
                let reply =
                    Message::reply_to(&message, Payload::HandshakeResponse(self.local_handshake()));
                if let Err(e) = self.send_message(&remote.device_id, reply).await {
                    warn!(peer = %remote.device_id, "handshake reply failed: {e}");
                }
            }
            Payload::HandshakeResponse(_) => {
                self.handshakes.signal(message);
            }
            _ => {}
        }
    }

    fn handlers_for(&self, message_type: MessageType) -> Vec<Arc<dyn MessageHandler>> {
        sync::read(&self.handlers)
            .get(&message_type)
            .map(|entry| entry.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    fn device_observers(&self) -> Vec<Arc<dyn DeviceObserver>> {
        sync::read(&self.device_observers)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

#[async_trait]
impl NetworkObserver for Communicator {
    async fn on_node_online(&self, device: &DeviceId) {
        debug!(peer = %device, "device online");
        for observer in self.device_observers() {
            observer.on_device_online(device).await;
        }
    }

    async fn on_node_offline(&self, device: &DeviceId) {
        debug!(peer = %device, "device offline");
        sync::lock(&self.sessions).remove(device);
        for observer in self.device_observers() {
            observer.on_device_offline(device).await;
        }
    }

    async fn on_new_message(&self, message: Message) {
        if !message.is_valid() {
            warn!("dropping message with bad magic");
            return;
        }
        let message = Arc::new(message);
        let message_type = message.message_type();
        if matches!(
            message_type,
            MessageType::HandshakeRequest | MessageType::HandshakeResponse
        ) {
            self.on_handshake(message).await;
            return;
        }
        let handlers = self.handlers_for(message_type);
        if handlers.is_empty() {
            debug!(?message_type, source = ?message.source(), "no handler for message");
            return;
        }
        for handler in handlers {
            handler.on_new_message(Arc::clone(&message)).await;
        }
    }
}
