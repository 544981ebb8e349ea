//! Append-only record log
//!
//! Variable-size records (serialized events, object payloads) are appended
//! to a byte log and addressed by their byte offset, which is what index
//! tuples store as their pointer.
//!
//! Record format:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ length: u32  │ payload [u8; length] │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! Snapshot file: 64-byte header (magic "TGRL", version, record count,
//! byte length, data checksum, header checksum) followed by the raw log.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Event;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::RwLock;

const LOG_MAGIC: [u8; 4] = *b"TGRL";
const LOG_VERSION: u16 = 1;
const HEADER_SIZE: usize = 64;
const LENGTH_SIZE: usize = 4;

#[derive(Debug, Default)]
struct LogData {
    bytes: Vec<u8>,
    records: u64,
}

/// Byte log of length-prefixed records
#[derive(Debug, Default)]
pub struct RecordLog {
    data: RwLock<LogData>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its offset
    pub fn append(&self, payload: &[u8]) -> StorageResult<u64> {
        let length = u32::try_from(payload.len()).map_err(|_| {
            StorageError::Serialization(format!("record of {} bytes is too large", payload.len()))
        })?;

        let mut data = self.data.write()?;
        let offset = data.bytes.len() as u64;
        data.bytes.extend_from_slice(&length.to_le_bytes());
        data.bytes.extend_from_slice(payload);
        data.records += 1;
        Ok(offset)
    }

    /// Read the record starting at `offset`
    pub fn read(&self, offset: u64) -> StorageResult<Vec<u8>> {
        let data = self.data.read()?;
        let start = offset as usize;
        let header = data
            .bytes
            .get(start..start + LENGTH_SIZE)
            .ok_or_else(|| StorageError::Corruption(format!("record offset {} out of range", offset)))?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;

        let body = start + LENGTH_SIZE;
        data.bytes
            .get(body..body + length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StorageError::Corruption(format!("record at {} is truncated", offset)))
    }

    pub fn record_count(&self) -> StorageResult<u64> {
        Ok(self.data.read()?.records)
    }

    pub fn size_bytes(&self) -> StorageResult<u64> {
        Ok(self.data.read()?.bytes.len() as u64)
    }

    /// Drop the last record, which must start at `offset`
    pub fn discard_last(&self, offset: u64) -> StorageResult<()> {
        let mut data = self.data.write()?;
        let start = offset as usize;
        let length = data
            .bytes
            .get(start..start + LENGTH_SIZE)
            .map(|h| u32::from_le_bytes([h[0], h[1], h[2], h[3]]) as usize)
            .ok_or_else(|| StorageError::Corruption(format!("record offset {} out of range", offset)))?;
        if start + LENGTH_SIZE + length != data.bytes.len() {
            return Err(StorageError::Corruption(format!(
                "record at {} is not the last one",
                offset
            )));
        }
        data.bytes.truncate(start);
        data.records -= 1;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let data = self.data.read()?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&LOG_MAGIC);
        header[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
        header[6..14].copy_from_slice(&data.records.to_le_bytes());
        header[14..22].copy_from_slice(&(data.bytes.len() as u64).to_le_bytes());
        header[22..26].copy_from_slice(&crc32fast::hash(&data.bytes).to_le_bytes());
        let checksum = crc32fast::hash(&header[0..60]);
        header[60..64].copy_from_slice(&checksum.to_le_bytes());

        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(&header)?;
        writer.write_all(&data.bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let stored = u32::from_le_bytes([header[60], header[61], header[62], header[63]]);
        if stored != crc32fast::hash(&header[0..60]) {
            return Err(StorageError::Corruption(
                "Record log header checksum mismatch".to_string(),
            ));
        }
        if header[0..4] != LOG_MAGIC {
            return Err(StorageError::Corruption("Invalid record log magic".to_string()));
        }

        let mut word = [0u8; 8];
        word.copy_from_slice(&header[6..14]);
        let records = u64::from_le_bytes(word);
        word.copy_from_slice(&header[14..22]);
        let length = u64::from_le_bytes(word) as usize;
        let checksum = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);

        let mut bytes = vec![0u8; length];
        reader.read_exact(&mut bytes)?;
        if crc32fast::hash(&bytes) != checksum {
            return Err(StorageError::Corruption(
                "Record log data checksum mismatch".to_string(),
            ));
        }

        Ok(Self {
            data: RwLock::new(LogData { bytes, records }),
        })
    }
}

/// Event log: bincode-encoded events in a [`RecordLog`]
#[derive(Debug, Default)]
pub struct EventStore {
    log: RecordLog,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_log(log: RecordLog) -> Self {
        Self { log }
    }

    /// Append an event, returning the pointer stored in index tuples
    pub fn append(&self, event: &Event) -> StorageResult<u64> {
        let bytes = bincode::serialize(event)?;
        self.log.append(&bytes)
    }

    pub fn get(&self, pointer: u64) -> StorageResult<Event> {
        let bytes = self.log.read(pointer)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }
}
