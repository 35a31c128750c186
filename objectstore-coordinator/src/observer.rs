//! Object observers and their subscription modes.

use async_trait::async_trait;
use objectstore_types::ObjectKey;
use std::fmt;
use std::ops::BitOr;

/// Callback registered against a key.
///
/// Pending changes to one key are coalesced: an observer receives at most
/// one `on_changed` and one `on_deleted` per notification cycle.
#[async_trait]
pub trait ObjectObserver: Send + Sync {
    async fn on_changed(&self, key: &ObjectKey);

    async fn on_deleted(&self, key: &ObjectKey);
}

/// Subscription mode bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObserverMode(u32);

impl ObserverMode {
    /// Fetch the current value when subscribing.
    pub const AUTO_GET: Self = Self(0x1);
    /// Carried to the owner with the subscription.
    pub const AUTO_REOBSERVE: Self = Self(0x2);
    pub const DEFAULT: Self = Self(0x3);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ObserverMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ObserverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverMode({:#x})", self.0)
    }
}
