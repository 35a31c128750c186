//! Object keys.
//!
//! A key names an object and embeds the id of the device that hosts it:
//!
//! ```text
//! dataobject://<host device>/<user>/<bundle>/<store>/<object...>
//! ```
//!
//! Equality is plain byte equality; the structure only matters when routing.

use crate::{DeviceId, Error, Result};
use std::fmt;

/// Scheme prefix every routable key starts with.
pub const OBJECT_KEY_SCHEME: &str = "dataobject://";

const SEPARATOR: u8 = b'/';
const STORE_INDEX: usize = 3;

/// Opaque byte string naming an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectKey(Vec<u8>);

impl ObjectKey {
    /// Wraps raw key bytes without validation.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Builds `dataobject://host/user/bundle/store/name`.
    #[must_use]
    pub fn build(host: &DeviceId, user: &str, bundle: &str, store: &str, name: &str) -> Self {
        let mut key = Self::prefix(host, user, bundle, store);
        key.push('/');
        key.push_str(name);
        Self(key.into_bytes())
    }

    /// Builds the `dataobject://host/user/bundle/store` prefix shared by all
    /// objects of one store.
    #[must_use]
    pub fn prefix(host: &DeviceId, user: &str, bundle: &str, store: &str) -> String {
        format!("{OBJECT_KEY_SCHEME}{host}/{user}/{bundle}/{store}")
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the key, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes following the scheme, if the key carries it.
    fn body(&self) -> Option<&[u8]> {
        self.0.strip_prefix(OBJECT_KEY_SCHEME.as_bytes())
    }

    /// The device that hosts this object.
    ///
    /// Returns `None` when the key lacks the scheme, has no `/` after the host
    /// segment, or the host segment is not a valid device id.
    #[must_use]
    pub fn owner(&self) -> Option<DeviceId> {
        let body = self.body()?;
        let end = body.iter().position(|b| *b == SEPARATOR)?;
        let host = std::str::from_utf8(&body[..end]).ok()?;
        DeviceId::new(host).ok()
    }

    /// Like [`owner`](Self::owner), but a key without an owner is an
    /// [`Error::InvalidKey`].
    pub fn require_owner(&self) -> Result<DeviceId> {
        self.owner()
            .ok_or_else(|| Error::InvalidKey(format!("no owning device in {self}")))
    }

    /// Whether `device` hosts this object.
    #[must_use]
    pub fn is_owned_by(&self, device: &DeviceId) -> bool {
        self.owner().as_ref() == Some(device)
    }

    /// The store segment (`host/user/bundle/<store>/...`), if present.
    #[must_use]
    pub fn store_name(&self) -> Option<&str> {
        let body = self.body()?;
        let mut segments = body.split(|b| *b == SEPARATOR);
        let store = segments.nth(STORE_INDEX)?;
        if store.is_empty() {
            return None;
        }
        std::str::from_utf8(store).ok()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for ObjectKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for ObjectKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for ObjectKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ObjectKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
