//! # Record Plumbing
//!
//! Stable record identifiers, the host-stream abstraction, and the alignment
//! helpers the codec builds on.
//!
//! The host owns the actual cosave file; the codec only ever talks to it
//! through [`RecordSink`] and [`RecordSource`]. [`MemoryStore`] is a complete
//! in-process implementation used by tests and tooling.

/// Record type holding the entity state registry.
pub const ENTITY_STATE_RECORD_TYPE: u32 = u32::from_le_bytes(*b"MVES");

/// Current layout version of the entity-state record.
pub const ENTITY_STATE_RECORD_VERSION: u32 = 0;

/// Record type holding the per-category name -> index assignments.
pub const PRESET_IDENTITY_RECORD_TYPE: u32 = u32::from_le_bytes(*b"MVPI");

/// Current layout version of the preset-identity record.
pub const PRESET_IDENTITY_RECORD_VERSION: u32 = 0;

/// Size of the staging buffer both codec directions run over.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Header of a record encountered while loading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    /// Stable record type identifier.
    pub type_id: u32,
    /// Layout version of the payload.
    pub version: u32,
    /// Total payload length in bytes.
    pub length: u32,
}

/// Write side of the host's cosave stream.
pub trait RecordSink {
    /// Opens a new record of the given type and version.
    ///
    /// Returns `false` if the host cannot accept the record.
    fn open_record(&mut self, type_id: u32, version: u32) -> bool;

    /// Appends `data` to the currently open record.
    ///
    /// Returns `false` on a write failure; the codec treats that as terminal
    /// for the record, never retrying.
    fn write_record_data(&mut self, data: &[u8]) -> bool;
}

/// Read side of the host's cosave stream.
pub trait RecordSource {
    /// Advances to the next record, returning its header, or `None` when the
    /// stream is exhausted.
    fn next_record(&mut self) -> Option<RecordInfo>;

    /// Reads up to `buf.len()` bytes of the current record's payload,
    /// returning the number of bytes produced (0 at end of payload).
    fn read_record_data(&mut self, buf: &mut [u8]) -> usize;
}

/// Rounds `value` up to a power-of-two `alignment`.
#[inline]
#[must_use]
pub(crate) const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Whether `value` is a multiple of a power-of-two `alignment`.
#[inline]
#[must_use]
pub(crate) const fn is_aligned(value: usize, alignment: usize) -> bool {
    value & (alignment - 1) == 0
}

/// In-memory cosave stream implementing both halves of the host interface.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<(u32, u32, Vec<u8>)>,
    cursor: usize,
    read_offset: usize,
    started: bool,
    /// When set, every write is reported as failed. Test hook.
    pub fail_writes: bool,
    /// When set, every record open is declined. Test hook.
    pub fail_opens: bool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pre-built record, e.g. one of an unknown type or version.
    pub fn push_raw(&mut self, type_id: u32, version: u32, payload: Vec<u8>) {
        self.records.push((type_id, version, payload));
    }

    /// Number of records held.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Rewinds the read cursor to the first record.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.read_offset = 0;
        self.started = false;
    }
}

impl RecordSink for MemoryStore {
    fn open_record(&mut self, type_id: u32, version: u32) -> bool {
        if self.fail_opens {
            return false;
        }
        self.records.push((type_id, version, Vec::new()));
        true
    }

    fn write_record_data(&mut self, data: &[u8]) -> bool {
        if self.fail_writes {
            return false;
        }
        match self.records.last_mut() {
            Some((_, _, payload)) => {
                payload.extend_from_slice(data);
                true
            }
            None => false,
        }
    }
}

impl RecordSource for MemoryStore {
    fn next_record(&mut self) -> Option<RecordInfo> {
        if self.started {
            self.cursor += 1;
        }
        self.started = true;
        self.read_offset = 0;
        let (type_id, version, payload) = self.records.get(self.cursor)?;
        let info = RecordInfo {
            type_id: *type_id,
            version: *version,
            length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
        };
        Some(info)
    }

    fn read_record_data(&mut self, buf: &mut [u8]) -> usize {
        let Some((_, _, payload)) = self.records.get(self.cursor) else {
            return 0;
        };
        let remaining = &payload[self.read_offset.min(payload.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_offset += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 8), 8);
        assert!(is_aligned(0, 4));
        assert!(is_aligned(8, 4));
        assert!(!is_aligned(6, 4));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert!(store.open_record(1, 0));
        assert!(store.write_record_data(&[1, 2, 3]));
        assert!(store.open_record(2, 5));
        assert!(store.write_record_data(&[9]));

        let first = store.next_record().unwrap();
        assert_eq!(first.type_id, 1);
        assert_eq!(first.length, 3);
        let mut buf = [0u8; 8];
        assert_eq!(store.read_record_data(&mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(store.read_record_data(&mut buf), 0);

        let second = store.next_record().unwrap();
        assert_eq!(second.type_id, 2);
        assert_eq!(second.version, 5);
        assert_eq!(store.read_record_data(&mut buf), 1);
        assert!(store.next_record().is_none());
    }
}
