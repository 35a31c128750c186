use objectstore_coordinator::waiter::{IdGenerator, WaiterTable};
use objectstore_coordinator::{CoordinatorError, Message, Payload};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn response_to(id: u16, status: u32) -> Arc<Message> {
    let request = Message::new(Payload::PutRequest { operation: vec![1] }).with_id(id);
    Arc::new(Message::reply_to(&request, Payload::PutResponse { status }))
}

// ── Ids ──────────────────────────────────────────────────────────

#[test]
fn ids_start_at_one_and_increase() {
    let ids = IdGenerator::new();
    assert_eq!(ids.next_id(), 1);
    assert_eq!(ids.next_id(), 2);
}

#[test]
fn ids_skip_zero_on_wrap() {
    let ids = IdGenerator::new();
    for _ in 0..u16::MAX - 1 {
        ids.next_id();
    }
    assert_eq!(ids.next_id(), u16::MAX);
    assert_eq!(ids.next_id(), 1);
}

// ── Correlation ──────────────────────────────────────────────────

#[tokio::test]
async fn response_reaches_its_waiter() {
    let table = WaiterTable::new();
    let first = table.register().unwrap();
    let second = table.register().unwrap();
    assert_ne!(first.id(), second.id());

    assert!(table.signal(response_to(second.id(), 7)));
    let response = second.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(response.payload(), &Payload::PutResponse { status: 7 });
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn signal_before_wait_is_kept() {
    let table = WaiterTable::new();
    let pending = table.register().unwrap();
    table.signal(response_to(pending.id(), 0));
    assert!(pending.wait(Duration::from_millis(10)).await.is_ok());
}

#[tokio::test]
async fn unknown_request_id_is_dropped() {
    let table = WaiterTable::new();
    let _pending = table.register().unwrap();
    assert!(!table.signal(response_to(999, 0)));
}

#[tokio::test]
async fn concurrent_signal_wakes_waiter() {
    let table = Arc::new(WaiterTable::new());
    let pending = table.register().unwrap();
    let id = pending.id();

    let signaller = Arc::clone(&table);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        signaller.signal(response_to(id, 0))
    });
    let response = pending.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(response.request_id(), id);
    assert!(handle.await.unwrap());
}

// ── Timeout and cleanup ──────────────────────────────────────────

#[tokio::test]
async fn wait_times_out() {
    let table = WaiterTable::new();
    let pending = table.register().unwrap();
    let err = pending.wait(Duration::from_millis(10)).await.unwrap_err();
    assert_eq!(err, CoordinatorError::Timeout);
}

#[tokio::test]
async fn dropping_the_guard_erases_the_entry() {
    let table = WaiterTable::new();
    let id = {
        let pending = table.register().unwrap();
        let _ = pending.wait(Duration::from_millis(1)).await;
        pending.id()
    };
    assert!(!table.contains(id));
    assert!(table.is_empty());
    // A late response finds nobody.
    assert!(!table.signal(response_to(id, 0)));
}
