//! # MORPHVAULT Cosave
//!
//! Persists the preset identity table and the entity state registry to the
//! save-companion store ("cosave") and reads them back.
//!
//! ## Guarantees
//!
//! 1. **Bounded buffering**: both directions run over one fixed 64 KiB
//!    buffer; making a host call for each tiny piece of data is the recipe
//!    for saves and loads that take longer than they should
//! 2. **Versioned records**: record type IDs and versions are stable
//!    integers; a layout change means a new version and a new decoder
//!    branch, old readers keep working by skipping what they don't know
//! 3. **Contained failure**: a broken record abandons only itself; sibling
//!    records still save or load
//!
//! ## Format
//!
//! ```text
//! Entity-state record v0:
//! [4 bytes: entity ID LE][4 bytes: state LE]  repeated; transient bits zero
//!
//! Preset-identity record v0, one block per category (Female then Male):
//! [4 bytes: next index LE]
//! then per assignment, 4-byte aligned:
//! [4 bytes: name length LE][4 bytes: index LE][name bytes][pad to 4]
//! terminated by [4 bytes: zero], not followed by anything
//! ```

pub mod codec;
pub mod error;
pub mod record;

pub use codec::StateCodec;
pub use error::CosaveError;
pub use record::{
    MemoryStore, RecordInfo, RecordSink, RecordSource, BUFFER_SIZE, ENTITY_STATE_RECORD_TYPE,
    ENTITY_STATE_RECORD_VERSION, PRESET_IDENTITY_RECORD_TYPE, PRESET_IDENTITY_RECORD_VERSION,
};
