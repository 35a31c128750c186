//! Server side for keys owned by this device.

use crate::communicator::{Communicator, MessageHandler};
use crate::dispatcher::OperationDispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::{Message, MessageType, Payload};
use crate::observer_manager::ObserverManager;
use crate::operation::{DataType, ObjectValue, Operation, OperationKind};
use async_trait::async_trait;
use objectstore_types::ObjectKey;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const HANDLED: [MessageType; 3] = [
    MessageType::PutRequest,
    MessageType::GetRequest,
    MessageType::DeleteRequest,
];

/// Applies operations on locally owned keys, whether they come from this
/// device or from a peer's request, and publishes the resulting changes.
pub struct LocalObjectTask {
    communicator: Arc<Communicator>,
    dispatcher: Arc<OperationDispatcher>,
    observers: Arc<ObserverManager>,
}

impl LocalObjectTask {
    pub fn new(
        communicator: Arc<Communicator>,
        dispatcher: Arc<OperationDispatcher>,
        observers: Arc<ObserverManager>,
    ) -> Self {
        Self {
            communicator,
            dispatcher,
            observers,
        }
    }

    pub fn init(self: &Arc<Self>) -> CoordinatorResult<()> {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .register_message_handler(message_type, handler.clone())?;
        }
        Ok(())
    }

    pub fn destroy(self: &Arc<Self>) {
        let handler: Weak<dyn MessageHandler> = Arc::<Self>::downgrade(self);
        for message_type in HANDLED {
            self.communicator
                .unregister_message_handler(message_type, &handler);
        }
    }

    /// Stores `value` under `key` and notifies observers.
    pub fn put(&self, key: &ObjectKey, value: ObjectValue) -> CoordinatorResult<()> {
        self.apply(Operation::put(key.clone(), value))
    }

    pub fn get(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<ObjectValue> {
        self.dispatcher.get(data_type, key)
    }

    /// Deletes `key` and notifies observers.
    pub fn delete(&self, key: &ObjectKey, data_type: DataType) -> CoordinatorResult<()> {
        self.apply(Operation::delete(key.clone(), data_type))
    }

    fn apply(&self, operation: Operation) -> CoordinatorResult<()> {
        operation.execute(&self.dispatcher)?;
        match operation {
            Operation::Put { key, value } => self.observers.publish(&key, value),
            Operation::Delete { key, data_type } => self.observers.publish_delete(&key, data_type),
            _ => {}
        }
        Ok(())
    }

    fn serve_get(&self, operation: &[u8]) -> CoordinatorResult<Vec<u8>> {
        let operation = Operation::decode_as(operation, OperationKind::Get)?;
        let key = operation.key().clone();
        let value = operation
            .execute(&self.dispatcher)?
            .unwrap_or_else(|| ObjectValue::empty(operation.data_type()));
        Ok(Operation::put(key, value).encode()?)
    }

    fn respond(&self, request: &Message) -> Option<Payload> {
        match request.payload() {
            Payload::PutRequest { operation } => {
                let result = Operation::decode_as(operation, OperationKind::Put)
                    .and_then(|op| self.apply(op));
                Some(Payload::PutResponse {
                    status: CoordinatorError::status_of(&result),
                })
            }
            Payload::GetRequest { operation } => {
                let result = self.serve_get(operation);
                Some(Payload::GetResponse {
                    status: CoordinatorError::status_of(&result),
                    operation: result.unwrap_or_default(),
                })
            }
            Payload::DeleteRequest { operation } => {
                let result = Operation::decode_as(operation, OperationKind::Delete)
                    .and_then(|op| self.apply(op));
                Some(Payload::DeleteResponse {
                    status: CoordinatorError::status_of(&result),
                })
            }
            _ => None,
        }
    }
}

#[async_trait]
impl MessageHandler for LocalObjectTask {
    async fn on_new_message(&self, message: Arc<Message>) {
        let Some(source) = message.source().cloned() else {
            warn!(message_type = ?message.message_type(), "request without source device");
            return;
        };
        let Some(payload) = self.respond(&message) else {
            return;
        };
        debug!(
            peer = %source,
            message_type = ?message.message_type(),
            id = message.id(),
            "served request"
        );
        let reply = Message::reply_to(&message, payload);
        // The operation has already been applied; a lost reply is not rolled back.
        if let Err(e) = self.communicator.send_message(&source, reply).await {
            warn!(peer = %source, "failed to send response: {e}");
        }
    }
}
