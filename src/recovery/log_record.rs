//! Log record types and their on-disk encoding.
//!
//! Every record starts with an 8-byte type tag and an 8-byte transaction id
//! (`-1` for checkpoints). Data records follow with the block (file name and
//! block number), the offset inside the block, and the old and new values.
//! All integers are big-endian `i64`; strings are length-prefixed UTF-8.

use serde::Serialize;
use std::fmt;

use crate::recovery::RecoveryError;
use crate::storage::{BlockId, LogManager, Lsn, Page, StorageResult, INT_SIZE};
use crate::transaction::{Transaction, TransactionError, TransactionId};

/// Type tag stored at the front of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogRecordKind {
    Checkpoint = 0,
    Start = 1,
    Commit = 2,
    Rollback = 3,
    SetInt = 4,
    SetString = 5,
}

impl LogRecordKind {
    fn from_tag(tag: i64) -> Result<Self, RecoveryError> {
        Ok(match tag {
            0 => Self::Checkpoint,
            1 => Self::Start,
            2 => Self::Commit,
            3 => Self::Rollback,
            4 => Self::SetInt,
            5 => Self::SetString,
            _ => return Err(RecoveryError::UnknownRecordType(tag)),
        })
    }

    fn tag(self) -> i64 {
        self as i64
    }
}

/// One record of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    Checkpoint,
    Start {
        tx: TransactionId,
    },
    Commit {
        tx: TransactionId,
    },
    Rollback {
        tx: TransactionId,
    },
    SetInt {
        tx: TransactionId,
        block: BlockId,
        offset: usize,
        old: i64,
        new: i64,
    },
    SetString {
        tx: TransactionId,
        block: BlockId,
        offset: usize,
        old: String,
        new: String,
    },
}

impl LogRecord {
    pub fn kind(&self) -> LogRecordKind {
        match self {
            Self::Checkpoint => LogRecordKind::Checkpoint,
            Self::Start { .. } => LogRecordKind::Start,
            Self::Commit { .. } => LogRecordKind::Commit,
            Self::Rollback { .. } => LogRecordKind::Rollback,
            Self::SetInt { .. } => LogRecordKind::SetInt,
            Self::SetString { .. } => LogRecordKind::SetString,
        }
    }

    /// Transaction that wrote the record; `None` for checkpoints.
    pub fn tx_id(&self) -> Option<TransactionId> {
        match self {
            Self::Checkpoint => None,
            Self::Start { tx }
            | Self::Commit { tx }
            | Self::Rollback { tx }
            | Self::SetInt { tx, .. }
            | Self::SetString { tx, .. } => Some(*tx),
        }
    }

    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        let tx = self.tx_id().map_or(-1, TransactionId::to_log_value);
        let mut writer = RecordWriter::new(self.encoded_len());
        writer.put_int(self.kind().tag())?;
        writer.put_int(tx)?;

        match self {
            Self::SetInt {
                block,
                offset,
                old,
                new,
                ..
            } => {
                writer.put_block(block, *offset)?;
                writer.put_int(*old)?;
                writer.put_int(*new)?;
            }
            Self::SetString {
                block,
                offset,
                old,
                new,
                ..
            } => {
                writer.put_block(block, *offset)?;
                writer.put_string(old)?;
                writer.put_string(new)?;
            }
            _ => {}
        }
        Ok(writer.finish())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecoveryError> {
        let mut reader = RecordReader::new(bytes);
        let kind = LogRecordKind::from_tag(reader.get_int()?)?;
        let raw_tx = reader.get_int()?;
        let tx = || {
            TransactionId::from_log_value(raw_tx).ok_or(RecoveryError::InvalidTransactionId(raw_tx))
        };

        Ok(match kind {
            LogRecordKind::Checkpoint => Self::Checkpoint,
            LogRecordKind::Start => Self::Start { tx: tx()? },
            LogRecordKind::Commit => Self::Commit { tx: tx()? },
            LogRecordKind::Rollback => Self::Rollback { tx: tx()? },
            LogRecordKind::SetInt => {
                let (block, offset) = reader.get_block()?;
                Self::SetInt {
                    tx: tx()?,
                    block,
                    offset,
                    old: reader.get_int()?,
                    new: reader.get_int()?,
                }
            }
            LogRecordKind::SetString => {
                let (block, offset) = reader.get_block()?;
                Self::SetString {
                    tx: tx()?,
                    block,
                    offset,
                    old: reader.get_string()?,
                    new: reader.get_string()?,
                }
            }
        })
    }

    /// Encodes the record and appends it to the log.
    pub fn write_to_log(&self, log_manager: &LogManager) -> StorageResult<Lsn> {
        log_manager.append(&self.to_bytes()?)
    }

    /// Restores the old value of a data record through `tx`, without logging.
    /// Other record kinds have nothing to undo.
    pub fn undo(&self, tx: &mut Transaction) -> Result<(), TransactionError> {
        match self {
            Self::SetInt {
                block, offset, old, ..
            } => {
                tx.pin(block)?;
                tx.set_int(block, *offset, *old, false)?;
                tx.unpin(block)
            }
            Self::SetString {
                block, offset, old, ..
            } => {
                tx.pin(block)?;
                tx.set_string(block, *offset, old, false)?;
                tx.unpin(block)
            }
            _ => Ok(()),
        }
    }

    fn encoded_len(&self) -> usize {
        let header = 2 * INT_SIZE;
        let location = |block: &BlockId| 3 * INT_SIZE + block.file_name().len();
        match self {
            Self::SetInt { block, .. } => header + location(block) + 2 * INT_SIZE,
            Self::SetString {
                block, old, new, ..
            } => header + location(block) + 2 * INT_SIZE + old.len() + new.len(),
            _ => header,
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkpoint => write!(f, "<CHECKPOINT>"),
            Self::Start { tx } => write!(f, "<START {}>", tx.value()),
            Self::Commit { tx } => write!(f, "<COMMIT {}>", tx.value()),
            Self::Rollback { tx } => write!(f, "<ROLLBACK {}>", tx.value()),
            Self::SetInt {
                tx,
                block,
                offset,
                old,
                new,
            } => write!(
                f,
                "<SETINT {} {} {} {} {} {}>",
                tx.value(),
                block.file_name(),
                block.number(),
                offset,
                old,
                new
            ),
            Self::SetString {
                tx,
                block,
                offset,
                old,
                new,
            } => write!(
                f,
                "<SETSTRING {} {} {} {} {} {}>",
                tx.value(),
                block.file_name(),
                block.number(),
                offset,
                old,
                new
            ),
        }
    }
}

/// Sequential writer over a scratch page sized for exactly one record.
struct RecordWriter {
    page: Page,
    position: usize,
}

impl RecordWriter {
    fn new(len: usize) -> Self {
        Self {
            page: Page::new(len),
            position: 0,
        }
    }

    fn put_int(&mut self, value: i64) -> StorageResult<()> {
        self.page.set_int(self.position, value)?;
        self.position += INT_SIZE;
        Ok(())
    }

    fn put_string(&mut self, value: &str) -> StorageResult<()> {
        self.page.set_string(self.position, value)?;
        self.position += INT_SIZE + value.len();
        Ok(())
    }

    fn put_block(&mut self, block: &BlockId, offset: usize) -> StorageResult<()> {
        self.put_string(block.file_name())?;
        self.put_int(block.number() as i64)?;
        self.put_int(offset as i64)
    }

    fn finish(self) -> Vec<u8> {
        self.page.into_bytes()
    }
}

struct RecordReader {
    page: Page,
    position: usize,
}

impl RecordReader {
    fn new(bytes: &[u8]) -> Self {
        Self {
            page: Page::from_bytes(bytes.to_vec()),
            position: 0,
        }
    }

    fn get_int(&mut self) -> StorageResult<i64> {
        let value = self.page.get_int(self.position)?;
        self.position += INT_SIZE;
        Ok(value)
    }

    fn get_string(&mut self) -> StorageResult<String> {
        let value = self.page.get_string(self.position)?;
        self.position += INT_SIZE + value.len();
        Ok(value)
    }

    fn get_block(&mut self) -> Result<(BlockId, usize), RecoveryError> {
        let file_name = self.get_string()?;
        let number = self.get_int()?;
        let number = u64::try_from(number).map_err(|_| RecoveryError::InvalidField {
            field: "block number",
            value: number,
        })?;
        let offset = self.get_int()?;
        let offset = usize::try_from(offset).map_err(|_| RecoveryError::InvalidField {
            field: "offset",
            value: offset,
        })?;
        Ok((BlockId::new(file_name, number), offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn sample_records() -> Vec<LogRecord> {
        vec![
            LogRecord::Checkpoint,
            LogRecord::Start { tx: tx(1) },
            LogRecord::Commit { tx: tx(2) },
            LogRecord::Rollback { tx: tx(3) },
            LogRecord::SetInt {
                tx: tx(4),
                block: BlockId::new("data.tbl", 7),
                offset: 80,
                old: -3,
                new: i64::MAX,
            },
            LogRecord::SetString {
                tx: tx(5),
                block: BlockId::new("names.tbl", 0),
                offset: 40,
                old: String::new(),
                new: "grüße".to_string(),
            },
        ]
    }

    #[test]
    fn test_encoding_round_trip() {
        for record in sample_records() {
            let bytes = record.to_bytes().unwrap();
            assert_eq!(LogRecord::from_bytes(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = LogRecord::Checkpoint.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2 * INT_SIZE);
        let page = Page::from_bytes(bytes);
        assert_eq!(page.get_int(0).unwrap(), 0);
        assert_eq!(page.get_int(INT_SIZE).unwrap(), -1);

        let page = Page::from_bytes(LogRecord::Commit { tx: tx(9) }.to_bytes().unwrap());
        assert_eq!(page.get_int(0).unwrap(), 2);
        assert_eq!(page.get_int(INT_SIZE).unwrap(), 9);
    }

    #[test]
    fn test_set_string_layout_is_packed() {
        let record = LogRecord::SetString {
            tx: tx(1),
            block: BlockId::new("f", 2),
            offset: 3,
            old: "ab".to_string(),
            new: "xyz".to_string(),
        };
        let page = Page::from_bytes(record.to_bytes().unwrap());

        assert_eq!(page.len(), 16 + (8 + 1) + 8 + 8 + (8 + 2) + (8 + 3));
        assert_eq!(page.get_int(0).unwrap(), 5);
        assert_eq!(page.get_string(16).unwrap(), "f");
        assert_eq!(page.get_int(25).unwrap(), 2);
        assert_eq!(page.get_int(33).unwrap(), 3);
        assert_eq!(page.get_string(41).unwrap(), "ab");
        assert_eq!(page.get_string(51).unwrap(), "xyz");
    }

    #[test]
    fn test_unknown_tag() {
        let mut page = Page::new(2 * INT_SIZE);
        page.set_int(0, 42).unwrap();
        assert!(matches!(
            LogRecord::from_bytes(page.contents()),
            Err(RecoveryError::UnknownRecordType(42))
        ));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = sample_records()[4].to_bytes().unwrap();
        assert!(matches!(
            LogRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(RecoveryError::Storage(_))
        ));
    }

    #[test]
    fn test_negative_block_fields() {
        let record = LogRecord::SetInt {
            tx: tx(1),
            block: BlockId::new("f", 2),
            offset: 3,
            old: 0,
            new: 1,
        };

        let mut page = Page::from_bytes(record.to_bytes().unwrap());
        page.set_int(25, -1).unwrap();
        assert!(matches!(
            LogRecord::from_bytes(page.contents()),
            Err(RecoveryError::InvalidField {
                field: "block number",
                value: -1
            })
        ));

        let mut page = Page::from_bytes(record.to_bytes().unwrap());
        page.set_int(33, i64::MIN).unwrap();
        assert!(matches!(
            LogRecord::from_bytes(page.contents()),
            Err(RecoveryError::InvalidField {
                field: "offset",
                value: i64::MIN
            })
        ));
    }

    #[test]
    fn test_kind_and_tx_id() {
        let records = sample_records();
        assert_eq!(records[0].kind(), LogRecordKind::Checkpoint);
        assert_eq!(records[0].tx_id(), None);
        assert_eq!(records[4].kind(), LogRecordKind::SetInt);
        assert_eq!(records[4].tx_id(), Some(tx(4)));
    }

    #[test]
    fn test_display() {
        let records = sample_records();
        assert_eq!(records[0].to_string(), "<CHECKPOINT>");
        assert_eq!(records[1].to_string(), "<START 1>");
        assert_eq!(records[2].to_string(), "<COMMIT 2>");
        assert_eq!(records[3].to_string(), "<ROLLBACK 3>");
        assert_eq!(
            records[4].to_string(),
            format!("<SETINT 4 data.tbl 7 80 -3 {}>", i64::MAX)
        );
        assert_eq!(records[5].to_string(), "<SETSTRING 5 names.tbl 0 40  grüße>");
    }

    #[test]
    fn test_json() {
        let json = serde_json::to_value(&sample_records()[4]).unwrap();
        assert_eq!(json["type"], "set_int");
        assert_eq!(json["tx"], 4);
        assert_eq!(json["block"]["file_name"], "data.tbl");
        assert_eq!(json["offset"], 80);

        let json = serde_json::to_value(LogRecord::Checkpoint).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "checkpoint" }));
    }
}
