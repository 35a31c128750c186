use objectstore_types::{DeviceId, Error, MAX_DEVICE_ID_LEN};
use std::collections::HashSet;
use std::str::FromStr;

// ── DeviceId ──────────────────────────────────────────────────────

#[test]
fn device_id_accepts_plain_string() {
    let id = DeviceId::new("phone-01").unwrap();
    assert_eq!(id.as_str(), "phone-01");
    assert_eq!(id.to_string(), "phone-01");
}

#[test]
fn device_id_rejects_empty() {
    assert!(matches!(DeviceId::new(""), Err(Error::InvalidDeviceId(_))));
}

#[test]
fn device_id_rejects_too_long() {
    let long = "x".repeat(MAX_DEVICE_ID_LEN + 1);
    assert!(DeviceId::new(long).is_err());
}

#[test]
fn device_id_accepts_exact_limit() {
    let exact = "x".repeat(MAX_DEVICE_ID_LEN);
    assert_eq!(DeviceId::new(exact).unwrap().as_bytes().len(), MAX_DEVICE_ID_LEN);
}

#[test]
fn device_id_rejects_nul() {
    assert!(DeviceId::new("ab\0cd").is_err());
}

#[test]
fn device_id_generate_is_unique_and_valid() {
    let a = DeviceId::generate();
    let b = DeviceId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 32);
    assert!(DeviceId::new(a.as_str()).is_ok());
}

#[test]
fn device_id_from_str() {
    let id = DeviceId::from_str("tablet").unwrap();
    assert_eq!(id, DeviceId::new("tablet").unwrap());
    assert!(DeviceId::from_str("").is_err());
}

#[test]
fn device_id_hash_and_eq() {
    let id = DeviceId::new("a").unwrap();
    let mut set = HashSet::new();
    set.insert(id.clone());
    set.insert(id); // duplicate
    assert_eq!(set.len(), 1);
}

// ── Serde ─────────────────────────────────────────────────────────

#[test]
fn device_id_serializes_as_string() {
    let id = DeviceId::new("watch").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"watch\"");
    let back: DeviceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn device_id_deserialize_validates() {
    let result: Result<DeviceId, _> = serde_json::from_str("\"\"");
    assert!(result.is_err());
}
