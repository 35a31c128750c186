//! Request/response correlation.
//!
//! A synchronous request registers a [`MessageWaiter`] in a [`WaiterTable`]
//! under a fresh id *before* the request is sent, then waits on it with a
//! timeout. The response path looks the waiter up by `request_id` and
//! signals it. The table entry is removed when the [`PendingResponse`] guard
//! drops, whatever the outcome, so a late response finds nothing to signal.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::message::Message;
use crate::sync;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Monotonic message id source. Never yields 0, which marks "no request".
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU16,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            next: AtomicU16::new(1),
        }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u16 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// One-shot slot a response is delivered into.
#[derive(Debug, Default)]
pub struct MessageWaiter {
    slot: Mutex<Option<Arc<Message>>>,
    notify: Notify,
}

impl MessageWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `message` and wakes the waiter. A second signal before the
    /// waiter runs replaces the first.
    pub fn signal(&self, message: Arc<Message>) {
        *sync::lock(&self.slot) = Some(message);
        self.notify.notify_one();
    }

    /// Waits until signalled or until `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> CoordinatorResult<Arc<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = sync::lock(&self.slot).take() {
                return Ok(message);
            }
            tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .map_err(|_| CoordinatorError::Timeout)?;
        }
    }
}

/// Outstanding requests of one subsystem, keyed by request id.
#[derive(Debug, Default)]
pub struct WaiterTable {
    ids: IdGenerator,
    waiters: Mutex<HashMap<u16, Arc<MessageWaiter>>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id and registers a waiter for it.
    pub fn register(&self) -> CoordinatorResult<PendingResponse<'_>> {
        let mut waiters = sync::lock(&self.waiters);
        for _ in 0..u16::MAX {
            let id = self.ids.next_id();
            if waiters.contains_key(&id) {
                continue;
            }
            let waiter = Arc::new(MessageWaiter::new());
            waiters.insert(id, Arc::clone(&waiter));
            return Ok(PendingResponse {
                table: self,
                id,
                waiter,
            });
        }
        Err(CoordinatorError::Allocation("no free request id".into()))
    }

    /// Next id from the table's generator, for messages that expect no
    /// response.
    pub fn next_id(&self) -> u16 {
        self.ids.next_id()
    }

    /// Delivers `response` to the waiter registered under its request id.
    /// Returns `false`, dropping the response, when nobody is waiting.
    pub fn signal(&self, response: Arc<Message>) -> bool {
        let request_id = response.request_id();
        let waiter = sync::lock(&self.waiters).get(&request_id).cloned();
        match waiter {
            Some(waiter) => {
                waiter.signal(response);
                true
            }
            None => {
                debug!(
                    request_id,
                    message_type = ?response.message_type(),
                    "dropping unmatched response"
                );
                false
            }
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        sync::lock(&self.waiters).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.waiters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u16) {
        sync::lock(&self.waiters).remove(&id);
    }
}

/// A registered waiter. Dropping it erases the table entry.
#[derive(Debug)]
pub struct PendingResponse<'a> {
    table: &'a WaiterTable,
    id: u16,
    waiter: Arc<MessageWaiter>,
}

impl PendingResponse<'_> {
    /// Id the request must be sent with.
    pub fn id(&self) -> u16 {
        self.id
    }

    pub async fn wait(&self, timeout: Duration) -> CoordinatorResult<Arc<Message>> {
        self.waiter.wait(timeout).await
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
