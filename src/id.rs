//! Identity types and allocators.
//!
//! All IDs are newtypes over `u64`. Every entity class draws from its own
//! [`IdProvider`], and the providers in [`IdProviders`] start in disjoint
//! blocks of [`ID_BLOCK_SIZE`] so a pin ID can never equal a node ID.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the numeric block reserved for each entity class.
pub const ID_BLOCK_SIZE: u64 = 10_000_000;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const INVALID: $name = $name(u64::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                $name(raw)
            }
        }
    };
}

entity_id!(
    /// Identifies a sheet or function sheet within a workspace.
    SheetId
);
entity_id!(
    /// Identifies a node within a workspace.
    NodeId
);
entity_id!(
    /// Identifies an input or output pin.
    PinId
);
entity_id!(
    /// Identifies a link between two pins.
    LinkId
);
entity_id!(
    /// Identifies a calculation job for the lifetime of one backend.
    JobId
);

/// Monotonic ID counter starting at a configurable base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdProvider {
    base: u64,
    next: u64,
}

impl IdProvider {
    pub fn new(base: u64) -> Self {
        Self { base, next: base }
    }

    /// Returns the next ID and advances the counter.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Returns the ID `next_id` would hand out without consuming it.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Restores the counter to its base.
    pub fn reset(&mut self) {
        self.next = self.base;
    }

    /// Changes the base and resets the counter to it.
    pub fn rebase(&mut self, new_base: u64) {
        self.base = new_base;
        self.reset();
    }
}

/// The four per-entity allocators owned by a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdProviders {
    pub sheets: IdProvider,
    pub nodes: IdProvider,
    pub links: IdProvider,
    pub pins: IdProvider,
}

impl IdProviders {
    pub fn new() -> Self {
        Self {
            sheets: IdProvider::new(0),
            nodes: IdProvider::new(ID_BLOCK_SIZE),
            links: IdProvider::new(2 * ID_BLOCK_SIZE),
            pins: IdProvider::new(3 * ID_BLOCK_SIZE),
        }
    }

    pub fn next_sheet(&mut self) -> SheetId {
        SheetId(self.sheets.next_id())
    }

    pub fn next_node(&mut self) -> NodeId {
        NodeId(self.nodes.next_id())
    }

    pub fn next_link(&mut self) -> LinkId {
        LinkId(self.links.next_id())
    }

    pub fn next_pin(&mut self) -> PinId {
        PinId(self.pins.next_id())
    }

    /// Resets every allocator to its original block start.
    pub fn reset_all(&mut self) {
        *self = Self::new();
    }
}

impl Default for IdProviders {
    fn default() -> Self {
        Self::new()
    }
}
