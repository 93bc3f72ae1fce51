//! # State Codec
//!
//! Encodes the preset identity table and the entity state registry into
//! versioned cosave records, and decodes them back.
//!
//! ## Design Principles
//!
//! 1. **One buffer, few host calls**: all payload bytes pass through a fixed
//!    64 KiB staging buffer; the host sees one write per full buffer, not one
//!    per field
//! 2. **Aligned payloads**: every record's payload is a whole number of its
//!    natural unit (8 bytes for entity states, 4 bytes for identity entries),
//!    so each refill on the read side can be validated cheaply
//! 3. **Failure stays local**: a record that fails to decode clears only the
//!    table it feeds; the other table keeps whatever its own record produced

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use morphvault_core::{Category, EntityState, EntityStateRegistry, PresetIdentityTable};

use crate::error::CosaveError;
use crate::record::{
    align_up, is_aligned, RecordSink, RecordSource, BUFFER_SIZE, ENTITY_STATE_RECORD_TYPE,
    ENTITY_STATE_RECORD_VERSION, PRESET_IDENTITY_RECORD_TYPE, PRESET_IDENTITY_RECORD_VERSION,
};

/// Buffered little-endian writer over an open record.
struct RecordWriter<'a, S: RecordSink + ?Sized> {
    sink: &'a mut S,
    buffer: Vec<u8>,
    total: usize,
}

impl<'a, S: RecordSink + ?Sized> RecordWriter<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(BUFFER_SIZE),
            total: 0,
        }
    }

    fn flush(&mut self) -> Result<(), CosaveError> {
        if !self.sink.write_record_data(&self.buffer) {
            return Err(CosaveError::WriteFailed);
        }
        self.buffer.clear();
        Ok(())
    }

    /// Appends raw bytes, flushing as the buffer fills. Byte runs longer than
    /// the remaining room are split across flushes.
    fn put_bytes(&mut self, mut data: &[u8]) -> Result<(), CosaveError> {
        while !data.is_empty() {
            let room = BUFFER_SIZE - self.buffer.len();
            if room == 0 {
                self.flush()?;
                continue;
            }
            let step = room.min(data.len());
            self.buffer.extend_from_slice(&data[..step]);
            self.total += step;
            data = &data[step..];
        }
        Ok(())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), CosaveError> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Zero-pads the payload up to the next multiple of `alignment`.
    fn pad_to(&mut self, alignment: usize) -> Result<(), CosaveError> {
        let target = align_up(self.total, alignment);
        while self.total < target {
            self.put_bytes(&[0])?;
        }
        Ok(())
    }

    /// Flushes whatever is still staged and consumes the writer.
    fn finish(mut self) -> Result<(), CosaveError> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Buffered little-endian reader over the current record's payload.
///
/// Every refill except a zero-length one must deliver a multiple of the
/// record's natural alignment; anything else means the payload was produced
/// by something other than this codec and decoding is abandoned.
struct RecordReader<'a, R: RecordSource + ?Sized> {
    source: &'a mut R,
    buffer: Box<[u8]>,
    len: usize,
    pos: usize,
    alignment: usize,
    exhausted: bool,
}

impl<'a, R: RecordSource + ?Sized> RecordReader<'a, R> {
    fn new(source: &'a mut R, alignment: usize) -> Self {
        Self {
            source,
            buffer: vec![0; BUFFER_SIZE].into_boxed_slice(),
            len: 0,
            pos: 0,
            alignment,
            exhausted: false,
        }
    }

    /// Pulls the next chunk of payload. Returns `false` at end of payload.
    fn refill(&mut self) -> Result<bool, CosaveError> {
        if self.exhausted {
            return Ok(false);
        }
        let delivered = self.source.read_record_data(&mut self.buffer);
        if delivered == 0 {
            self.exhausted = true;
            return Ok(false);
        }
        if !is_aligned(delivered, self.alignment) {
            self.exhausted = true;
            return Err(CosaveError::Misaligned {
                remaining: delivered,
            });
        }
        self.len = delivered;
        self.pos = 0;
        Ok(true)
    }

    /// Whether the payload has been fully consumed. May refill.
    fn at_end(&mut self) -> Result<bool, CosaveError> {
        if self.pos < self.len {
            return Ok(false);
        }
        Ok(!self.refill()?)
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<(), CosaveError> {
        let mut written = 0;
        while written < out.len() {
            if self.pos == self.len && !self.refill()? {
                return Err(CosaveError::Truncated);
            }
            let step = (self.len - self.pos).min(out.len() - written);
            out[written..written + step].copy_from_slice(&self.buffer[self.pos..self.pos + step]);
            self.pos += step;
            written += step;
        }
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32, CosaveError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Discards `count` payload bytes (padding).
    fn skip(&mut self, mut count: usize) -> Result<(), CosaveError> {
        while count > 0 {
            if self.pos == self.len && !self.refill()? {
                return Err(CosaveError::Truncated);
            }
            let step = (self.len - self.pos).min(count);
            self.pos += step;
            count -= step;
        }
        Ok(())
    }
}

/// Saves and loads both core tables through the host's cosave stream.
#[derive(Debug)]
pub struct StateCodec {
    identity: Arc<PresetIdentityTable>,
    registry: Arc<EntityStateRegistry>,
}

impl StateCodec {
    /// Creates a codec over the given tables.
    #[must_use]
    pub fn new(identity: Arc<PresetIdentityTable>, registry: Arc<EntityStateRegistry>) -> Self {
        Self { identity, registry }
    }

    /// Writes one record per table into `sink`.
    ///
    /// A record that fails to open or write is logged and dropped; the other
    /// record is still attempted. Nothing here aborts the host's save.
    pub fn save_state<S: RecordSink + ?Sized>(&self, sink: &mut S) {
        let entity_record = if sink.open_record(ENTITY_STATE_RECORD_TYPE, ENTITY_STATE_RECORD_VERSION)
        {
            self.write_entity_states(sink)
        } else {
            Err(CosaveError::OpenRecord {
                type_id: ENTITY_STATE_RECORD_TYPE,
                version: ENTITY_STATE_RECORD_VERSION,
            })
        };
        match entity_record {
            Ok(count) => debug!(count, "saved entity state record"),
            Err(err) => error!(%err, "failed to save entity state record"),
        }

        let identity_record = if sink
            .open_record(PRESET_IDENTITY_RECORD_TYPE, PRESET_IDENTITY_RECORD_VERSION)
        {
            self.write_preset_identities(sink)
        } else {
            Err(CosaveError::OpenRecord {
                type_id: PRESET_IDENTITY_RECORD_TYPE,
                version: PRESET_IDENTITY_RECORD_VERSION,
            })
        };
        match identity_record {
            Ok(count) => debug!(count, "saved preset identity record"),
            Err(err) => error!(%err, "failed to save preset identity record"),
        }
    }

    /// Reads every record in `source`, applying the ones this codec knows.
    ///
    /// Unknown record types and unsupported versions are skipped. If a known
    /// record appears more than once, only the first occurrence is applied.
    /// A record that fails to decode clears the table it feeds and nothing
    /// else.
    pub fn load_state<R: RecordSource + ?Sized>(&self, source: &mut R) {
        let mut entity_record_seen = false;
        let mut identity_record_seen = false;

        while let Some(info) = source.next_record() {
            match (info.type_id, info.version) {
                (ENTITY_STATE_RECORD_TYPE, ENTITY_STATE_RECORD_VERSION) => {
                    if entity_record_seen {
                        warn!("duplicate entity state record; keeping the first");
                        continue;
                    }
                    entity_record_seen = true;
                    if let Err(err) = self.read_entity_states(source) {
                        error!(%err, "failed to load entity state record");
                        self.registry.clear();
                    }
                }
                (PRESET_IDENTITY_RECORD_TYPE, PRESET_IDENTITY_RECORD_VERSION) => {
                    if identity_record_seen {
                        warn!("duplicate preset identity record; keeping the first");
                        continue;
                    }
                    identity_record_seen = true;
                    if let Err(err) = self.read_preset_identities(source) {
                        error!(%err, "failed to load preset identity record");
                        self.identity.clear();
                    }
                }
                (
                    type_id @ (ENTITY_STATE_RECORD_TYPE | PRESET_IDENTITY_RECORD_TYPE),
                    version,
                ) => {
                    error!(type_id, version, "unsupported record version; skipping");
                }
                (type_id, version) => {
                    error!(type_id, version, "unknown record type; skipping");
                }
            }
        }
    }

    /// Drops everything loaded from the cosave: assignments, counters, and
    /// the entity registry. Loaded preset definitions are untouched.
    pub fn revert_state(&self) {
        self.identity.clear();
        self.registry.clear();
        info!("reverted cosave-backed state");
    }

    fn write_entity_states<S: RecordSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<u32, CosaveError> {
        let mut writer = RecordWriter::new(sink);
        let mut failure = None;
        let mut count: u32 = 0;

        self.registry.for_each_until(|entity, state| {
            let persisted = state.persisted();
            // Entries with nothing persisted would only bloat the record.
            if persisted.bits() == 0 {
                return true;
            }
            let wrote = writer
                .put_u32(entity)
                .and_then(|()| writer.put_u32(persisted.bits()));
            match wrote {
                Ok(()) => {
                    count += 1;
                    true
                }
                Err(err) => {
                    failure = Some(err);
                    false
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }
        writer.finish()?;
        Ok(count)
    }

    fn read_entity_states<R: RecordSource + ?Sized>(
        &self,
        source: &mut R,
    ) -> Result<(), CosaveError> {
        let mut reader = RecordReader::new(source, 8);
        let mut count: u32 = 0;

        while !reader.at_end()? {
            let entity = reader.read_u32()?;
            let bits = reader.read_u32()?;
            self.registry.restore(entity, EntityState::from_bits(bits));
            count += 1;
        }

        debug!(count, "loaded entity state record");
        Ok(())
    }

    fn write_preset_identities<S: RecordSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<u32, CosaveError> {
        let mut writer = RecordWriter::new(sink);
        let mut count: u32 = 0;

        for category in Category::ALL {
            writer.put_u32(self.identity.next_index(category))?;
            for (name, index) in self.identity.export_assignments(category) {
                let length = u32::try_from(name.len()).map_err(|_| CosaveError::WriteFailed)?;
                writer.put_u32(length)?;
                writer.put_u32(index)?;
                writer.put_bytes(name.as_bytes())?;
                writer.pad_to(4)?;
                count += 1;
            }
            // A zero name length closes the category's block.
            writer.put_u32(0)?;
        }

        writer.finish()?;
        Ok(count)
    }

    fn read_preset_identities<R: RecordSource + ?Sized>(
        &self,
        source: &mut R,
    ) -> Result<(), CosaveError> {
        let mut reader = RecordReader::new(source, 4);
        let mut count: u32 = 0;

        for category in Category::ALL {
            let next = reader.read_u32()?;
            let mut entries = Vec::new();
            loop {
                let length = reader.read_u32()?;
                if length == 0 {
                    break;
                }
                let index = reader.read_u32()?;
                if index >= next {
                    return Err(CosaveError::IndexOutOfRange {
                        index,
                        ceiling: next,
                    });
                }
                let mut bytes = vec![0u8; length as usize];
                reader.read_exact(&mut bytes)?;
                reader.skip(align_up(length as usize, 4) - length as usize)?;
                // Names are written verbatim; tolerate whatever came back.
                let name = String::from_utf8_lossy(&bytes).into_owned();
                entries.push((name, index));
                count += 1;
            }
            self.identity.restore_assignments(category, next, entries);
        }

        debug!(count, "loaded preset identity record");
        Ok(())
    }
}
