//! Device identifiers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest device id that still fits the NUL-terminated 65 byte header field.
pub const MAX_DEVICE_ID_LEN: usize = 64;

/// Identifier of a device participating in the mesh.
///
/// Opaque to the coordinator apart from two rules: it is non-empty and it
/// fits in the fixed header field, so it may not contain NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Validates and wraps a device id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidDeviceId("empty".into()));
        }
        if id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::InvalidDeviceId(format!(
                "{} bytes exceeds limit of {MAX_DEVICE_ID_LEN}",
                id.len()
            )));
        }
        if id.as_bytes().contains(&0) {
            return Err(Error::InvalidDeviceId("contains NUL byte".into()));
        }
        Ok(Self(id))
    }

    /// Generates a random device id (UUID v4, hyphen-free).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
