//! # Change Events and Listener Contracts
//!
//! The value objects that cross the plugin boundary. Everything here is an
//! immutable snapshot: once a fan-out begins, every listener observes the
//! same event. Evolving the payload means adding a new versioned type, not
//! mutating this one.

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use morphvault_core::EntityId;

/// Which kind of entity change a fan-out reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeChannel {
    /// A body was generated (or regenerated) for the entity.
    Generated,
    /// The assigned preset changed without regenerating the body.
    PresetChangedWithoutGeneration,
    /// The entity's clothing state was re-evaluated.
    ClothingUpdate,
    /// An overlay was forcefully changed on the entity.
    OverlayForcefullyChanged,
    /// The entity's morphs were cleared.
    MorphsCleared,
}

/// Named condition bits attached to a change event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChangeFlags(u64);

impl ChangeFlags {
    /// No conditions.
    pub const NONE: Self = Self(0);
    /// The entity is currently considered clothed.
    pub const IS_CLOTHED: Self = Self(1 << 0);
    /// An overlay is applied to the entity.
    pub const IS_OVERLAY_APPLIED: Self = Self(1 << 1);
    /// Overlay application is enabled for the entity.
    pub const IS_OVERLAY_ENABLED: Self = Self(1 << 2);
    /// The entity has been processed at least once.
    pub const IS_PROCESSED: Self = Self(1 << 3);
    /// The entity is blacklisted from processing.
    pub const IS_BLACKLISTED: Self = Self(1 << 4);
    /// The change was triggered while the entity is equipping an item.
    pub const IS_EQUIPPING: Self = Self(1 << 5);
    /// The change removed the entity's preset assignment.
    pub const PRESET_WAS_UNASSIGNED: Self = Self(1 << 6);

    /// Reconstructs flags from their raw bit representation.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bit representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether no bits are set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The immutable payload delivered to every change listener in one fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What kind of change happened.
    pub channel: ChangeChannel,
    /// Conditions in effect when the change happened.
    pub flags: ChangeFlags,
    /// The preset the change refers to, when one is involved.
    pub preset_name: Option<Arc<str>>,
    /// Who caused the change, when known (e.g. an interface owner).
    pub source: Option<Arc<str>>,
}

/// Subscriber to per-entity change events.
///
/// Invoked synchronously, in registration order, with the same snapshot for
/// every listener of one fan-out. Must not (de)register listeners from
/// within the callback.
pub trait ActorChangeListener: Send + Sync {
    /// Called once per fan-out the listener is subscribed to.
    fn on_actor_change(&self, entity: EntityId, event: &ChangeEvent);
}

/// Subscriber to readiness transitions.
///
/// The `becoming_*` notifications fire while the transition is in progress
/// and default to no-ops; most subscribers only care about the settled
/// states.
pub trait ReadinessListener: Send + Sync {
    /// The system has begun entering the ready state.
    fn becoming_ready(&self) {}

    /// The system is ready; its state is stable and queryable.
    fn ready(&self);

    /// The system has begun leaving the ready state.
    fn becoming_unready(&self) {}

    /// The system is no longer ready; its state may be mid-replacement.
    fn no_longer_ready(&self);
}

/// Host lifecycle signals routed into the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Static data has finished loading.
    DataLoaded,
    /// A save is about to be written.
    PreSave,
    /// A save has finished writing.
    SaveCompleted,
    /// A save has finished loading.
    PostLoad,
    /// A load was reverted before completing.
    Revert,
}

/// The readiness state machine's states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Not ready; state may be absent or mid-replacement.
    Unready,
    /// Transitioning towards [`Readiness::Ready`].
    BecomingReady,
    /// Ready; state is stable and queryable.
    Ready,
    /// Transitioning towards [`Readiness::Unready`].
    BecomingUnready,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_operations() {
        let flags = ChangeFlags::IS_CLOTHED | ChangeFlags::IS_PROCESSED;
        assert!(flags.contains(ChangeFlags::IS_CLOTHED));
        assert!(flags.contains(ChangeFlags::IS_PROCESSED));
        assert!(!flags.contains(ChangeFlags::IS_BLACKLISTED));
        assert!(ChangeFlags::NONE.is_empty());
        assert_eq!(ChangeFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn test_flag_accumulation() {
        let mut flags = ChangeFlags::NONE;
        flags |= ChangeFlags::IS_EQUIPPING;
        flags |= ChangeFlags::PRESET_WAS_UNASSIGNED;
        assert!(flags.contains(ChangeFlags::IS_EQUIPPING | ChangeFlags::PRESET_WAS_UNASSIGNED));
    }
}
