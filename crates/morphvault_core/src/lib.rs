//! # MORPHVAULT Core
//!
//! Identity assignment and entity tracking for the MORPHVAULT preset system.
//!
//! ## Design Principles
//!
//! 1. **Indexes, not names** - entities carry a small integer identity, so
//!    save-file growth stays bounded and per-entity state fits one atomic word
//! 2. **Indexes are forever** - once a preset name gets an index, that index
//!    is never reused, even if the preset definition later disappears
//! 3. **Single-key atomicity** - every mutation of per-entity state is one
//!    atomic visit under the map's shard lock, never a read-then-write pair
//!
//! ## Thread Safety
//!
//! The identity table and the registry are process-wide services shared
//! behind `Arc`. All operations are synchronous and safe to call from any
//! thread; distinct keys do not contend.

pub mod category;
pub mod identity;
pub mod registry;

pub use category::Category;
pub use identity::{PresetIdentityTable, PresetRecord, SparseIndex, SPARSE_INDEX_BITS};
pub use registry::{EntityId, EntityState, EntityStateRegistry};
