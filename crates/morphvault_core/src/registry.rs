//! # Entity State Registry
//!
//! Tracks, per game entity, which preset index is assigned to it, packed into
//! a single 32-bit word alongside a transient re-entrancy guard bit.
//!
//! The word is the same size as an entity identifier so that storing it in a
//! hashtable keyed by entity IDs is as compact as can be. Every mutation is
//! performed as one atomic visit of the packed word under the map's per-shard
//! lock; a preset-slot update can never clobber a concurrent guard-flag
//! update, or vice versa.

use bytemuck::{Pod, Zeroable};
use dashmap::DashMap;

/// Host-side identity of a tracked entity (e.g. a form ID).
pub type EntityId = u32;

/// Packed per-entity state.
///
/// Layout:
/// - bits `0..20`: assigned preset index **plus one**; zero means "no preset
///   assigned"
/// - bit `20`: change events are currently being sent for this entity
/// - bits `21..32`: reserved, persisted as zero
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityState(u32);

impl EntityState {
    /// Width of the preset-slot field.
    pub const SLOT_BITS: u32 = 20;

    const SLOT_MASK: u32 = (1 << Self::SLOT_BITS) - 1;
    const GUARD_BIT: u32 = 1 << Self::SLOT_BITS;

    /// The bits that survive a save/load round-trip.
    ///
    /// Used only by the cosave codec; the guard bit and the reserved bits are
    /// transient and never written to disk.
    pub const PERSISTED_MASK: u32 = Self::SLOT_MASK;

    /// Reconstructs a state from its raw bit representation.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the assigned preset slot: sparse index plus one, 0 = none.
    #[inline]
    #[must_use]
    pub const fn preset_slot(self) -> u32 {
        self.0 & Self::SLOT_MASK
    }

    /// Replaces the preset slot, leaving every other bit untouched.
    #[inline]
    pub fn set_preset_slot(&mut self, slot: u32) {
        debug_assert!(slot <= Self::SLOT_MASK);
        self.0 = (self.0 & !Self::SLOT_MASK) | (slot & Self::SLOT_MASK);
    }

    /// Whether change events are currently being fanned out for this entity.
    #[inline]
    #[must_use]
    pub const fn change_events_in_flight(self) -> bool {
        (self.0 & Self::GUARD_BIT) != 0
    }

    /// Sets or clears the re-entrancy guard, leaving every other bit untouched.
    #[inline]
    pub fn set_change_events_in_flight(&mut self, in_flight: bool) {
        if in_flight {
            self.0 |= Self::GUARD_BIT;
        } else {
            self.0 &= !Self::GUARD_BIT;
        }
    }

    /// Returns this state reduced to the bits that are persisted.
    #[inline]
    #[must_use]
    pub const fn persisted(self) -> Self {
        Self(self.0 & Self::PERSISTED_MASK)
    }
}

/// Concurrent per-entity state storage.
///
/// Entries are created lazily on first reference and never explicitly
/// destroyed; stale entries for entities no longer loaded are harmless.
#[derive(Debug, Default)]
pub struct EntityStateRegistry {
    states: DashMap<EntityId, EntityState>,
}

impl EntityStateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the preset slot assigned to `entity` (0 = no assignment).
    #[must_use]
    pub fn assigned_slot(&self, entity: EntityId) -> u32 {
        self.states
            .get(&entity)
            .map_or(0, |entry| entry.preset_slot())
    }

    /// Assigns `slot` to `entity`, preserving the guard bit.
    pub fn set_assigned_slot(&self, entity: EntityId, slot: u32) {
        self.states
            .entry(entity)
            .and_modify(|state| state.set_preset_slot(slot))
            .or_insert_with(|| {
                let mut state = EntityState::default();
                state.set_preset_slot(slot);
                state
            });
    }

    /// Test-and-sets the re-entrancy guard for `entity`.
    ///
    /// Returns the *previous* guard value; the guard is set either way. Used
    /// only by the event dispatcher.
    pub fn try_enter_change_guard(&self, entity: EntityId) -> bool {
        let mut previous = false;
        self.states
            .entry(entity)
            .and_modify(|state| {
                previous = state.change_events_in_flight();
                state.set_change_events_in_flight(true);
            })
            .or_insert_with(|| {
                let mut state = EntityState::default();
                state.set_change_events_in_flight(true);
                state
            });
        previous
    }

    /// Clears the re-entrancy guard for `entity`.
    pub fn exit_change_guard(&self, entity: EntityId) {
        self.states
            .entry(entity)
            .and_modify(|state| state.set_change_events_in_flight(false));
    }

    /// Visits every entry until `visit` returns `false`.
    ///
    /// Returns `true` if every entry was visited. The iteration order is
    /// unspecified. Entries observed are point-in-time snapshots.
    pub fn for_each_until(&self, mut visit: impl FnMut(EntityId, EntityState) -> bool) -> bool {
        for entry in &self.states {
            if !visit(*entry.key(), *entry.value()) {
                return false;
            }
        }
        true
    }

    /// Reinstates an entry from persisted data, masking out transient bits.
    pub fn restore(&self, entity: EntityId, state: EntityState) {
        self.states.insert(entity, state.persisted());
    }

    /// Removes every entry. Used when a load is reverted.
    pub fn clear(&self) {
        self.states.clear();
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no entities are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_state_fields_are_independent() {
        let mut state = EntityState::default();
        state.set_preset_slot(42);
        state.set_change_events_in_flight(true);
        assert_eq!(state.preset_slot(), 42);
        assert!(state.change_events_in_flight());

        state.set_preset_slot(7);
        assert!(state.change_events_in_flight());
        state.set_change_events_in_flight(false);
        assert_eq!(state.preset_slot(), 7);
    }

    #[test]
    fn test_persisted_mask_drops_guard_bit() {
        let mut state = EntityState::default();
        state.set_preset_slot(5);
        state.set_change_events_in_flight(true);
        assert_eq!(state.persisted().bits(), 5);
        assert!(!state.persisted().change_events_in_flight());
    }

    #[test]
    fn test_unknown_entity_has_no_assignment() {
        let registry = EntityStateRegistry::new();
        assert_eq!(registry.assigned_slot(0x0000_1234), 0);
    }

    #[test]
    fn test_set_and_get_assignment() {
        let registry = EntityStateRegistry::new();
        registry.set_assigned_slot(0x0000_1234, 1);
        assert_eq!(registry.assigned_slot(0x0000_1234), 1);
    }

    #[test]
    fn test_slot_update_preserves_guard() {
        let registry = EntityStateRegistry::new();
        assert!(!registry.try_enter_change_guard(9));
        registry.set_assigned_slot(9, 3);

        // The guard entered before the slot write must still be observable.
        assert!(registry.try_enter_change_guard(9));
        registry.exit_change_guard(9);
        assert!(!registry.try_enter_change_guard(9));
        assert_eq!(registry.assigned_slot(9), 3);
    }

    #[test]
    fn test_guard_on_untracked_entity_creates_entry() {
        let registry = EntityStateRegistry::new();
        assert!(!registry.try_enter_change_guard(77));
        assert!(registry.try_enter_change_guard(77));
        registry.exit_change_guard(77);
        assert_eq!(registry.assigned_slot(77), 0);
    }

    #[test]
    fn test_restore_masks_transient_bits() {
        let registry = EntityStateRegistry::new();
        let mut dirty = EntityState::default();
        dirty.set_preset_slot(12);
        dirty.set_change_events_in_flight(true);

        registry.restore(0xBEEF, dirty);
        assert_eq!(registry.assigned_slot(0xBEEF), 12);
        assert!(!registry.try_enter_change_guard(0xBEEF));
        registry.exit_change_guard(0xBEEF);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = EntityStateRegistry::new();
        registry.set_assigned_slot(1, 1);
        registry.set_assigned_slot(2, 2);
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }
}
