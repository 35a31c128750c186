//! Network abstraction.
//!
//! The coordinator does not discover peers or manage transports itself. It
//! sends messages through a [`Network`] and receives online/offline and
//! inbound-message events through a [`NetworkObserver`].

use crate::error::CoordinatorResult;
use crate::message::Message;
use async_trait::async_trait;
use objectstore_types::DeviceId;
use std::sync::Weak;

/// Receiver of network events. Implemented by the communicator.
#[async_trait]
pub trait NetworkObserver: Send + Sync {
    async fn on_node_online(&self, device: &DeviceId);

    async fn on_node_offline(&self, device: &DeviceId);

    /// Called once per inbound message, in the order the peer sent them.
    async fn on_new_message(&self, message: Message);
}

/// Byte delivery between devices.
#[async_trait]
pub trait Network: Send + Sync {
    /// Id of the device this network runs on.
    fn local_device_id(&self) -> DeviceId;

    /// Starts delivering events to `observer`.
    async fn start(&self, observer: Weak<dyn NetworkObserver>) -> CoordinatorResult<()>;

    /// Stops delivery. Stopping a stopped network is a no-op.
    async fn stop(&self) -> CoordinatorResult<()>;

    async fn open_session(&self, peer: &DeviceId) -> CoordinatorResult<()>;

    async fn close_session(&self, peer: &DeviceId) -> CoordinatorResult<()>;

    async fn send_message(&self, peer: &DeviceId, message: &Message) -> CoordinatorResult<()>;

    /// Peers currently reachable.
    fn remote_devices(&self) -> Vec<DeviceId>;
}

/// In-process mesh for tests and simulation.
pub mod mock {
    use super::*;
    use crate::error::CoordinatorError;
    use crate::message::MessageType;
    use crate::sync;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    enum MeshEvent {
        Online(DeviceId),
        Offline(DeviceId),
        Message(Vec<u8>),
        Shutdown,
    }

    /// A message the mesh delivered.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMessage {
        pub from: DeviceId,
        pub to: DeviceId,
        pub message_type: MessageType,
        pub size: usize,
    }

    #[derive(Default)]
    struct MeshState {
        inboxes: HashMap<DeviceId, mpsc::UnboundedSender<MeshEvent>>,
        severed: HashSet<(DeviceId, DeviceId)>,
        sent: Vec<SentMessage>,
    }

    impl MeshState {
        fn linked(&self, a: &DeviceId, b: &DeviceId) -> bool {
            !self.severed.contains(&link(a, b))
        }

        fn post(&self, to: &DeviceId, event: MeshEvent) {
            if let Some(inbox) = self.inboxes.get(to) {
                let _ = inbox.send(event);
            }
        }
    }

    fn link(a: &DeviceId, b: &DeviceId) -> (DeviceId, DeviceId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Shared medium connecting every [`MemoryNetwork`] created from it.
    ///
    /// Each started node has an unbounded inbox drained by one delivery task,
    /// so messages from one peer arrive in send order.
    #[derive(Default)]
    pub struct MemoryMesh {
        state: Mutex<MeshState>,
    }

    impl MemoryMesh {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Creates the network endpoint for `device`.
        pub fn join(self: &Arc<Self>, device: DeviceId) -> Arc<MemoryNetwork> {
            Arc::new(MemoryNetwork {
                local: device,
                mesh: Arc::clone(self),
                sessions: Mutex::new(HashSet::new()),
                worker: tokio::sync::Mutex::new(None),
            })
        }

        /// Cuts the link between `a` and `b`. Both sides see the other go
        /// offline.
        pub fn sever(&self, a: &DeviceId, b: &DeviceId) {
            let mut state = sync::lock(&self.state);
            if state.severed.insert(link(a, b)) {
                state.post(a, MeshEvent::Offline(b.clone()));
                state.post(b, MeshEvent::Offline(a.clone()));
            }
        }

        /// Restores the link between `a` and `b`.
        pub fn heal(&self, a: &DeviceId, b: &DeviceId) {
            let mut state = sync::lock(&self.state);
            if state.severed.remove(&link(a, b))
                && state.inboxes.contains_key(a)
                && state.inboxes.contains_key(b)
            {
                state.post(a, MeshEvent::Online(b.clone()));
                state.post(b, MeshEvent::Online(a.clone()));
            }
        }

        /// Every message delivered so far.
        pub fn sent(&self) -> Vec<SentMessage> {
            sync::lock(&self.state).sent.clone()
        }

        /// Messages of `message_type` delivered from `from` to `to`.
        pub fn sent_between(
            &self,
            from: &DeviceId,
            to: &DeviceId,
            message_type: MessageType,
        ) -> Vec<SentMessage> {
            sync::lock(&self.state)
                .sent
                .iter()
                .filter(|m| &m.from == from && &m.to == to && m.message_type == message_type)
                .cloned()
                .collect()
        }

        pub fn clear_sent(&self) {
            sync::lock(&self.state).sent.clear();
        }

        fn attach(&self, device: &DeviceId, inbox: mpsc::UnboundedSender<MeshEvent>) {
            let mut state = sync::lock(&self.state);
            let peers: Vec<DeviceId> = state
                .inboxes
                .keys()
                .filter(|peer| *peer != device && state.linked(device, peer))
                .cloned()
                .collect();
            for peer in &peers {
                state.post(peer, MeshEvent::Online(device.clone()));
                let _ = inbox.send(MeshEvent::Online(peer.clone()));
            }
            state.inboxes.insert(device.clone(), inbox);
        }

        fn detach(&self, device: &DeviceId) {
            let mut state = sync::lock(&self.state);
            if let Some(inbox) = state.inboxes.remove(device) {
                let _ = inbox.send(MeshEvent::Shutdown);
            }
            let peers: Vec<DeviceId> = state
                .inboxes
                .keys()
                .filter(|peer| state.linked(device, peer))
                .cloned()
                .collect();
            for peer in &peers {
                state.post(peer, MeshEvent::Offline(device.clone()));
            }
        }

        fn deliver(
            &self,
            from: &DeviceId,
            to: &DeviceId,
            message: &Message,
        ) -> CoordinatorResult<()> {
            let bytes = message.encode()?;
            let mut state = sync::lock(&self.state);
            if !state.inboxes.contains_key(from) {
                return Err(CoordinatorError::Network(format!("{from} is not started")));
            }
            if !state.linked(from, to) {
                return Err(CoordinatorError::Network(format!("{to} is unreachable")));
            }
            let size = bytes.len();
            let inbox = state
                .inboxes
                .get(to)
                .ok_or_else(|| CoordinatorError::Network(format!("{to} is offline")))?;
            inbox
                .send(MeshEvent::Message(bytes))
                .map_err(|_| CoordinatorError::Network(format!("{to} inbox closed")))?;
            state.sent.push(SentMessage {
                from: from.clone(),
                to: to.clone(),
                message_type: message.message_type(),
                size,
            });
            Ok(())
        }

        fn reachable_from(&self, device: &DeviceId) -> Vec<DeviceId> {
            let state = sync::lock(&self.state);
            if !state.inboxes.contains_key(device) {
                return Vec::new();
            }
            let mut peers: Vec<DeviceId> = state
                .inboxes
                .keys()
                .filter(|peer| *peer != device && state.linked(device, peer))
                .cloned()
                .collect();
            peers.sort();
            peers
        }
    }

    /// One device's endpoint on a [`MemoryMesh`].
    pub struct MemoryNetwork {
        local: DeviceId,
        mesh: Arc<MemoryMesh>,
        sessions: Mutex<HashSet<DeviceId>>,
        worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    }

    impl MemoryNetwork {
        pub fn mesh(&self) -> &Arc<MemoryMesh> {
            &self.mesh
        }

        /// Peers with an open session.
        pub fn sessions(&self) -> Vec<DeviceId> {
            let mut sessions: Vec<_> = sync::lock(&self.sessions).iter().cloned().collect();
            sessions.sort();
            sessions
        }

        async fn deliver_loop(
            local: DeviceId,
            mut inbox: mpsc::UnboundedReceiver<MeshEvent>,
            observer: Weak<dyn NetworkObserver>,
        ) {
            while let Some(event) = inbox.recv().await {
                let Some(observer) = observer.upgrade() else {
                    break;
                };
                match event {
                    MeshEvent::Online(peer) => observer.on_node_online(&peer).await,
                    MeshEvent::Offline(peer) => observer.on_node_offline(&peer).await,
                    MeshEvent::Message(bytes) => match Message::decode(&bytes) {
                        Ok(message) => observer.on_new_message(message).await,
                        Err(e) => warn!(device = %local, "dropping undecodable message: {e}"),
                    },
                    MeshEvent::Shutdown => break,
                }
            }
            debug!(device = %local, "delivery loop stopped");
        }
    }

    #[async_trait]
    impl Network for MemoryNetwork {
        fn local_device_id(&self) -> DeviceId {
            self.local.clone()
        }

        async fn start(&self, observer: Weak<dyn NetworkObserver>) -> CoordinatorResult<()> {
            let mut worker = self.worker.lock().await;
            if worker.is_some() {
                return Ok(());
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.mesh.attach(&self.local, tx);
            *worker = Some(tokio::spawn(Self::deliver_loop(
                self.local.clone(),
                rx,
                observer,
            )));
            debug!(device = %self.local, "memory network started");
            Ok(())
        }

        async fn stop(&self) -> CoordinatorResult<()> {
            let handle = self.worker.lock().await.take();
            if let Some(handle) = handle {
                self.mesh.detach(&self.local);
                sync::lock(&self.sessions).clear();
                if let Err(e) = handle.await {
                    warn!(device = %self.local, "delivery loop ended abnormally: {e}");
                }
                debug!(device = %self.local, "memory network stopped");
            }
            Ok(())
        }

        async fn open_session(&self, peer: &DeviceId) -> CoordinatorResult<()> {
            if !self.mesh.reachable_from(&self.local).contains(peer) {
                return Err(CoordinatorError::Network(format!("cannot open session to {peer}")));
            }
            sync::lock(&self.sessions).insert(peer.clone());
            Ok(())
        }

        async fn close_session(&self, peer: &DeviceId) -> CoordinatorResult<()> {
            sync::lock(&self.sessions).remove(peer);
            Ok(())
        }

        async fn send_message(&self, peer: &DeviceId, message: &Message) -> CoordinatorResult<()> {
            self.mesh.deliver(&self.local, peer, message)
        }

        fn remote_devices(&self) -> Vec<DeviceId> {
            self.mesh.reachable_from(&self.local)
        }
    }
}
