//! Append-only commit journal.
//!
//! Every commit is one frame:
//!
//! ```text
//! | magic (4) | length (4) | payload (N) | checksum (4) |
//! ```
//!
//! The payload is a CBOR [`JournalRecord`]. The checksum is the first four
//! bytes of SHA-256 over magic, length and payload.
//!
//! ## Recovery
//!
//! - A frame cut short at the end of the journal is a torn write from a
//!   crash. It is discarded and the journal truncated to the last whole
//!   frame.
//! - Bad magic, a checksum mismatch, an undecodable payload or a sequence
//!   that does not increase is corruption and aborts the open.

use crate::backend::StorageBackend;
use crate::config::Config;
use crate::entity::{decode, encode};
use crate::error::{StoreError, StoreResult};
use crate::types::SequenceNumber;
use scopedb_core::EntityId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes opening every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SDBJ";

const HEADER_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 4;

/// One committed unit: every write of one commit, possibly from several
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Sequence assigned to the commit.
    pub seq: SequenceNumber,
    /// Writes in application order.
    pub writes: Vec<JournalWrite>,
}

/// A single write inside a [`JournalRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalWrite {
    /// Target collection.
    pub collection: String,
    /// Target entity.
    pub id: EntityId,
    /// New encoded value, or `None` for a delete.
    pub payload: Option<Vec<u8>>,
}

pub(crate) fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

/// Builds the frame for `record`.
pub fn encode_frame(record: &JournalRecord) -> StoreResult<Vec<u8>> {
    let payload = encode(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Codec("journal record exceeds 4 GiB".into()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let sum = checksum(&frame);
    frame.extend_from_slice(&sum);
    Ok(frame)
}

/// Writer and recovery reader over a storage backend.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    repair_torn_tail: bool,
    max_record_size: u32,
}

impl Journal {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, config: &Config) -> Self {
        Self {
            backend,
            sync_on_commit: config.sync_on_commit,
            repair_torn_tail: config.repair_torn_tail,
            max_record_size: config.max_record_size,
        }
    }

    /// Appends one record and makes it durable.
    ///
    /// On failure the journal is cut back to where it was, so a failed
    /// commit never reappears on replay.
    pub(crate) fn append(&mut self, record: &JournalRecord) -> StoreResult<u64> {
        let frame = encode_frame(record)?;
        if frame.len() - HEADER_SIZE - CHECKSUM_SIZE > self.max_record_size as usize {
            return Err(StoreError::Codec(format!(
                "commit record of {} bytes exceeds the {} byte limit",
                frame.len(),
                self.max_record_size
            )));
        }

        let start = self.backend.size()?;
        let result = self.backend.append(&frame).and_then(|offset| {
            if self.sync_on_commit {
                self.backend.sync()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(undo) = self.rollback_to(start) {
                    tracing::error!(offset = start, error = %undo, "failed to cut back journal after write error");
                }
                Err(err.into())
            }
        }
    }

    fn rollback_to(&mut self, start: u64) -> StoreResult<()> {
        if self.backend.size()? > start {
            self.backend.truncate(start)?;
        }
        Ok(())
    }

    /// Reads every whole record, repairing a torn tail if configured to.
    pub(crate) fn recover(&mut self) -> StoreResult<Vec<JournalRecord>> {
        let size = self.backend.size()?;
        let mut records: Vec<JournalRecord> = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_SIZE as u64 {
                return self.torn_tail(offset, size, records);
            }

            let header = self.backend.read_at(offset, HEADER_SIZE)?;
            if header[..4] != JOURNAL_MAGIC {
                return Err(StoreError::corruption(offset, "bad frame magic"));
            }
            let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if len > self.max_record_size {
                return Err(StoreError::corruption(
                    offset,
                    format!("frame length {len} exceeds limit"),
                ));
            }

            let frame_len = (HEADER_SIZE + len as usize + CHECKSUM_SIZE) as u64;
            if remaining < frame_len {
                return self.torn_tail(offset, size, records);
            }

            let frame = self.backend.read_at(offset, frame_len as usize)?;
            let body_end = frame.len() - CHECKSUM_SIZE;
            if checksum(&frame[..body_end]) != frame[body_end..] {
                return Err(StoreError::corruption(offset, "checksum mismatch"));
            }

            let record: JournalRecord = decode(&frame[HEADER_SIZE..body_end])
                .map_err(|e| StoreError::corruption(offset, e.to_string()))?;
            if let Some(last) = records.last() {
                if record.seq <= last.seq {
                    return Err(StoreError::corruption(
                        offset,
                        format!("sequence {} does not follow {}", record.seq, last.seq),
                    ));
                }
            }

            records.push(record);
            offset += frame_len;
        }

        tracing::debug!(records = records.len(), bytes = size, "journal replayed");
        Ok(records)
    }

    fn torn_tail(
        &mut self,
        offset: u64,
        size: u64,
        records: Vec<JournalRecord>,
    ) -> StoreResult<Vec<JournalRecord>> {
        if !self.repair_torn_tail {
            return Err(StoreError::corruption(offset, "incomplete frame at end of journal"));
        }
        tracing::warn!(offset, discarded = size - offset, "truncating torn journal tail");
        self.backend.truncate(offset)?;
        Ok(records)
    }

    pub(crate) fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }
}
