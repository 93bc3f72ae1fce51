//! # Preset Identity Table
//!
//! Maps preset names to stable *sparse indexes*, per category.
//!
//! Entities refer to presets by index rather than by name to keep the
//! per-entity tracking state small - the bigger that state is, the bigger
//! save files are - and because integers are far easier to handle atomically
//! than variable-length strings.
//!
//! The downside is that an index must stay consistent between saves and
//! loads, even if the player installs or removes preset definitions
//! mid-playthrough. The scheme is simple: the first time a name is seen it is
//! allocated the next index, the assignments are persisted in the cosave, and
//! they are read back on load. Indexes are never reclaimed, so an entity
//! whose preset was only temporarily missing gets it back instead of being
//! silently reassigned to whatever reused the slot.
//!
//! Because removed presets keep their index, the index space is sparse with
//! respect to the currently loaded preset set; the dense table maps a sparse
//! index to its current backing data, with a sentinel for absent entries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::category::Category;

/// A stable, never-reclaimed preset identity.
pub type SparseIndex = u32;

/// Width of a sparse index.
///
/// This permits 1,048,575 preset definitions per category to be active at a
/// time. That should be enough, surely? The ceiling is documented, not
/// actively enforced.
pub const SPARSE_INDEX_BITS: u32 = 20;

/// Dense-table sentinel for "this index has no loaded backing data".
const ABSENT: u32 = u32::MAX;

/// A loaded preset definition, as supplied by the preset-loading collaborator.
///
/// The core treats preset data as opaque; all it needs is the name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresetRecord {
    /// The preset's name, as defined by its source file.
    pub name: Arc<str>,
}

impl PresetRecord {
    /// Creates a record for a named preset.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

/// Dense storage for one category: the loaded preset set plus the sparse
/// index -> loaded position mapping.
///
/// An array beats a hashtable here: the mapping is expected to be very dense,
/// so a hashtable would spend more memory on more expensive lookups.
#[derive(Debug, Default)]
struct DenseState {
    slots: Vec<u32>,
    presets: Vec<PresetRecord>,
}

#[derive(Debug, Default)]
struct CategoryTable {
    /// Intended for index assignment, not general lookups (which are
    /// case-insensitive and go through the loaded set).
    index_by_name: DashMap<String, SparseIndex>,
    next_index: AtomicU32,
    dense: RwLock<DenseState>,
}

/// Process-wide table of preset identities, one partition per [`Category`].
#[derive(Debug, Default)]
pub struct PresetIdentityTable {
    categories: [CategoryTable; Category::ALL.len()],
}

impl PresetIdentityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn table(&self, category: Category) -> &CategoryTable {
        &self.categories[category.slot()]
    }

    /// Returns the index assigned to `name` in `category`, allocating the
    /// next one if the name has never been seen.
    ///
    /// Idempotent: the same `(name, category)` always yields the same index.
    /// The allocation counter advances exactly once per new name; the map's
    /// entry API performs the check-and-insert under one shard lock.
    pub fn assign_index(&self, name: &str, category: Category) -> SparseIndex {
        let table = self.table(category);

        if let Some(existing) = table.index_by_name.get(name) {
            return *existing;
        }

        let index = *table
            .index_by_name
            .entry(name.to_owned())
            .or_insert_with(|| table.next_index.fetch_add(1, Ordering::Relaxed));

        // A fresh allocation extends the dense table with an absent slot;
        // install_presets or restore_assignments fills it in later.
        let mut dense = table.dense.write();
        if dense.slots.len() <= index as usize {
            dense.slots.resize(index as usize + 1, ABSENT);
        }

        index
    }

    /// Returns the index already assigned to `name`, if any. Exact match.
    #[must_use]
    pub fn lookup_index(&self, name: &str, category: Category) -> Option<SparseIndex> {
        self.table(category).index_by_name.get(name).map(|i| *i)
    }

    /// Replaces the loaded preset set for `category`.
    ///
    /// Every preset name gets an identity (allocating for first-sighted
    /// names) and the dense table is rebuilt to point at the new set.
    pub fn install_presets(&self, category: Category, presets: Vec<PresetRecord>) {
        for preset in &presets {
            self.assign_index(&preset.name, category);
        }

        let table = self.table(category);
        let mut dense = table.dense.write();
        dense.presets = presets;
        Self::rebuild_slots(table, &mut dense);
    }

    fn rebuild_slots(table: &CategoryTable, dense: &mut DenseState) {
        let next = table.next_index.load(Ordering::Relaxed) as usize;
        dense.slots.clear();
        dense.slots.resize(next, ABSENT);
        for (position, preset) in dense.presets.iter().enumerate() {
            if let Some(index) = table.index_by_name.get(preset.name.as_ref()) {
                // A restored assignment may carry an index at or above the
                // restored counter; such a preset stays unresolvable rather
                // than growing the table past the counter.
                if let Some(slot) = dense.slots.get_mut(*index as usize) {
                    *slot = u32::try_from(position).unwrap_or(ABSENT);
                }
            }
        }
    }

    /// Resolves a sparse index to its currently loaded preset.
    ///
    /// Returns `None` for out-of-range indexes and for indexes whose backing
    /// definition is not in the loaded set - a miss, not an error.
    #[must_use]
    pub fn resolve(&self, index: SparseIndex, category: Category) -> Option<PresetRecord> {
        let dense = self.table(category).dense.read();
        let position = *dense.slots.get(index as usize)?;
        if position == ABSENT {
            return None;
        }
        dense.presets.get(position as usize).cloned()
    }

    /// Resolves a sparse index to the name of its loaded preset.
    #[must_use]
    pub fn resolve_name(&self, index: SparseIndex, category: Category) -> Option<Arc<str>> {
        self.resolve(index, category).map(|preset| preset.name)
    }

    /// Finds a loaded preset by name, case-insensitively.
    #[must_use]
    pub fn find_loaded(&self, name: &str, category: Category) -> Option<PresetRecord> {
        let dense = self.table(category).dense.read();
        dense
            .presets
            .iter()
            .find(|preset| preset.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Number of presets in the currently loaded set.
    #[must_use]
    pub fn preset_count(&self, category: Category) -> usize {
        self.table(category).dense.read().presets.len()
    }

    /// Returns up to `limit` loaded preset names starting at `offset`.
    #[must_use]
    pub fn names(&self, category: Category, offset: usize, limit: usize) -> Vec<Arc<str>> {
        let dense = self.table(category).dense.read();
        dense
            .presets
            .iter()
            .skip(offset)
            .take(limit)
            .map(|preset| preset.name.clone())
            .collect()
    }

    /// The next index the category's allocation counter would hand out.
    #[must_use]
    pub fn next_index(&self, category: Category) -> u32 {
        self.table(category).next_index.load(Ordering::Relaxed)
    }

    /// Snapshots every `(name, index)` assignment in `category`.
    ///
    /// The order is unspecified; the cosave format does not depend on it.
    #[must_use]
    pub fn export_assignments(&self, category: Category) -> Vec<(String, SparseIndex)> {
        self.table(category)
            .index_by_name
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Replaces `category`'s assignments and counter with persisted data.
    ///
    /// Loaded presets whose names the persisted map has never seen get fresh
    /// identities, and the dense table is rebuilt against the restored map.
    pub fn restore_assignments(
        &self,
        category: Category,
        next: u32,
        entries: Vec<(String, SparseIndex)>,
    ) {
        let table = self.table(category);
        table.index_by_name.clear();
        for (name, index) in entries {
            table.index_by_name.insert(name, index);
        }
        table.next_index.store(next, Ordering::Relaxed);

        let loaded: Vec<Arc<str>> = {
            let dense = table.dense.read();
            dense.presets.iter().map(|p| p.name.clone()).collect()
        };
        for name in &loaded {
            self.assign_index(name, category);
        }

        let mut dense = table.dense.write();
        Self::rebuild_slots(table, &mut dense);
    }

    /// Drops every assignment and zeroes every counter. Used when a load is
    /// reverted; the loaded preset sets themselves are retained.
    pub fn clear(&self) {
        for table in &self.categories {
            table.index_by_name.clear();
            table.next_index.store(0, Ordering::Relaxed);
            table.dense.write().slots.clear();
        }
    }
}
