//! Peer-to-peer coordination engine for the distributed object store.
//!
//! Every object key names the device that owns the object. Operations on a
//! key owned by this device are applied to local storage directly; operations
//! on any other key are forwarded to its owner over the network, either
//! synchronously (request, then wait for the correlated response) or through
//! a per-(device, key) queue whose adjacent writes are merged before sending.
//!
//! # Components
//!
//! - **Message / codec**: the fixed-header binary protocol and a bounds-checked
//!   byte reader/writer shared by every payload
//! - **Operation / dispatcher**: typed, mergeable units of work and the
//!   registry of storage executors that carries them out
//! - **Communicator**: message bus over an abstract [`Network`], dispatching
//!   inbound messages to handlers by type
//! - **Tasks**: the local (server) and remote (client) sides of put/get/delete
//! - **Observers**: local change callbacks, subscriptions at remote owners and
//!   change fan-out to remote subscribers
//! - **Engine**: the [`CoordinateEngine`] facade that wires it all together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use objectstore_coordinator::network::mock::MemoryMesh;
//! use objectstore_coordinator::{CoordinateEngine, CoordinatorConfig, OperationDispatcher};
//! use objectstore_storage::MemoryStorageEngine;
//! use objectstore_types::DeviceId;
//!
//! let mesh = MemoryMesh::new();
//! let network = mesh.join(DeviceId::new("device-a").unwrap());
//! let storage = Arc::new(MemoryStorageEngine::open_in_memory().unwrap());
//! let dispatcher = Arc::new(OperationDispatcher::with_map_storage(storage));
//!
//! let engine = CoordinateEngine::new(network, dispatcher, CoordinatorConfig::for_app("demo"));
//! assert!(!engine.is_initialized());
//! ```

pub mod codec;
pub mod communicator;
mod config;
pub mod dispatcher;
mod engine;
mod error;
pub mod local_observers;
pub mod local_task;
pub mod message;
pub mod network;
pub mod observer;
pub mod observer_manager;
pub mod operation;
pub mod remote_observers;
pub mod remote_task;
mod sync;
pub mod task_manager;
pub mod waiter;

pub use communicator::{Communicator, DeviceObserver, MessageHandler};
pub use config::{CoordinatorConfig, DEFAULT_REQUEST_TIMEOUT_MS};
pub use dispatcher::{MapStoreExecutor, OperationDispatcher, OperationExecutor};
pub use engine::CoordinateEngine;
pub use error::{CoordinatorError, CoordinatorResult, ERROR_CODE_BASE, SUCCESS};
pub use message::{Handshake, Message, MessageFlag, MessageHeader, MessageType, Payload};
pub use network::{Network, NetworkObserver};
pub use observer::{ObjectObserver, ObserverMode};
pub use operation::{DataType, ObjectValue, Operation, OperationKind};
