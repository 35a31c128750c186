//! Core type definitions for the distributed object store.
//!
//! This crate defines the plain value types every other layer agrees on:
//! - Device identifiers, as carried in the wire header
//! - Object keys, which embed the id of the device that owns the object
//! - The byte-keyed field map that forms an object's value
//!
//! Nothing in here performs I/O; ownership of a key is derived by parsing its
//! bytes and never requires a network round trip.

use std::collections::BTreeMap;

mod ids;
mod key;

pub use ids::{DeviceId, MAX_DEVICE_ID_LEN};
pub use key::{ObjectKey, OBJECT_KEY_SCHEME};

/// Raw bytes of a field name or field value.
pub type Bytes = Vec<u8>;

/// The value of a map object: field name to field value.
///
/// A `BTreeMap` keeps encoding order stable, so two equal maps always
/// serialize to identical bytes.
pub type FieldMap = BTreeMap<Bytes, Bytes>;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur constructing or parsing core types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}
