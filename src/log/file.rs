//! File-backed log storage: the on-disk byte layout from spec §4.1.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{OpLogError, Result};
use crate::position::LogPosition;
use crate::record::{Header, Mode, HEADER_LEN, MAGIC, RECORD_PREFIX_LEN};
use crate::tx_id::TxId;

pub(crate) struct FileBacking {
    file: File,
    path: PathBuf,
    tx_id: TxId,
    mode: Mode,
    /// Start offsets of every record currently in the file, in append order.
    record_offsets: Vec<u64>,
    end_offset: u64,
}

impl FileBacking {
    pub(crate) fn create(path: &Path, tx_id: TxId) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| OpLogError::io_at(path, e))?;
        let header = Header { mode: Mode::Undo, tx_id };
        file.write_all(&header.encode()).map_err(|e| OpLogError::io_at(path, e))?;
        file.flush().map_err(|e| OpLogError::io_at(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            tx_id,
            mode: Mode::Undo,
            record_offsets: Vec::new(),
            end_offset: HEADER_LEN,
        })
    }

    pub(crate) fn open_existing(path: &Path, expected_tx_id: Option<TxId>) -> Result<Self> {
        let (valid, header, record_offsets, file_len) = validate_file(path)?;
        if !valid {
            return Err(OpLogError::corrupt(format!("{} failed validation", path.display())));
        }
        let header = header.expect("validated file always yields a header");
        if let Some(expected) = expected_tx_id {
            if expected != header.tx_id {
                return Err(OpLogError::state(format!(
                    "tx id mismatch reopening {}: expected {expected}, found {}",
                    path.display(),
                    header.tx_id
                )));
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| OpLogError::io_at(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            tx_id: header.tx_id,
            mode: header.mode,
            record_offsets,
            end_offset: file_len,
        })
    }

    pub(crate) fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.file.seek(SeekFrom::Start(12)).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file
            .write_all(&mode.to_u32().to_be_bytes())
            .map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.flush().map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.sync_data().map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.mode = mode;
        Ok(())
    }

    pub(crate) fn position(&self) -> LogPosition {
        LogPosition::Byte(self.end_offset)
    }

    pub(crate) fn truncate(&mut self, pos: LogPosition) -> Result<()> {
        let off = pos
            .as_byte()
            .ok_or_else(|| OpLogError::invalid("truncate position is not a byte offset"))?;
        if off > self.end_offset {
            return Err(OpLogError::invalid("truncate position past current append point"));
        }
        self.file.set_len(off).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.flush().map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.record_offsets.retain(|&o| o < off);
        self.end_offset = off;
        Ok(())
    }

    pub(crate) fn positions(&self, reverse: bool) -> Vec<LogPosition> {
        let mut offsets = self.record_offsets.clone();
        if reverse {
            offsets.reverse();
        }
        offsets.into_iter().map(LogPosition::Byte).collect()
    }

    pub(crate) fn positions_to(&self, pos: LogPosition) -> Result<Vec<LogPosition>> {
        let off =
            pos.as_byte().ok_or_else(|| OpLogError::invalid("position is not a byte offset"))?;
        Ok(self
            .record_offsets
            .iter()
            .copied()
            .filter(|&o| o >= off)
            .rev()
            .map(LogPosition::Byte)
            .collect())
    }

    pub(crate) fn append_body(&mut self, body: &[u8]) -> Result<()> {
        let start = self.end_offset;
        let len = body.len() as u32;
        self.file.seek(SeekFrom::Start(start)).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.write_all(&MAGIC.to_be_bytes()).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.write_all(&len.to_be_bytes()).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.write_all(body).map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.file.flush().map_err(|e| OpLogError::io_at(&self.path, e))?;
        self.record_offsets.push(start);
        self.end_offset = start + RECORD_PREFIX_LEN + u64::from(len);
        Ok(())
    }

    pub(crate) fn read_body(&mut self, pos: LogPosition) -> Result<Vec<u8>> {
        let off =
            pos.as_byte().ok_or_else(|| OpLogError::invalid("position is not a byte offset"))?;
        if !self.record_offsets.contains(&off) {
            return Err(OpLogError::invalid(format!("no record starts at offset {off}")));
        }
        self.file.seek(SeekFrom::Start(off)).map_err(|e| OpLogError::io_at(&self.path, e))?;
        let mut prefix = [0u8; RECORD_PREFIX_LEN as usize];
        self.file.read_exact(&mut prefix).map_err(|e| OpLogError::io_at(&self.path, e))?;
        let magic = u32::from_be_bytes(prefix[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(OpLogError::corrupt(format!("bad record magic {magic:#x} at {off}")));
        }
        let len = u32::from_be_bytes(prefix[4..8].try_into().unwrap());
        if off + RECORD_PREFIX_LEN + u64::from(len) > self.end_offset {
            return Err(OpLogError::corrupt(format!(
                "record at {off} claims length {len}, runs past end of file"
            )));
        }
        let mut body = vec![0u8; len as usize];
        self.file.read_exact(&mut body).map_err(|e| OpLogError::io_at(&self.path, e))?;
        Ok(body)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads the header, then iterates records by `8 + L` each step until EOF
/// is reached cleanly. Returns whether the file validated, the header (if
/// at least readable), the record start offsets found, and the file's byte
/// length. Used both when opening a single log and when a store rescans
/// its directory for orphans.
pub(crate) fn validate_file(path: &Path) -> Result<(bool, Option<Header>, Vec<u64>, u64)> {
    let mut file = File::open(path).map_err(|e| OpLogError::io_at(path, e))?;
    let file_len = file.metadata().map_err(|e| OpLogError::io_at(path, e))?.len();
    if file_len < HEADER_LEN {
        return Ok((false, None, Vec::new(), file_len));
    }
    let mut header_buf = [0u8; HEADER_LEN as usize];
    if file.read_exact(&mut header_buf).is_err() {
        return Ok((false, None, Vec::new(), file_len));
    }
    let header = match Header::decode(&header_buf) {
        Ok(h) => h,
        Err(_) => return Ok((false, None, Vec::new(), file_len)),
    };

    let mut offsets = Vec::new();
    let mut cursor = HEADER_LEN;
    loop {
        if cursor == file_len {
            break;
        }
        if cursor + RECORD_PREFIX_LEN > file_len {
            return Ok((false, Some(header), Vec::new(), file_len));
        }
        if file.seek(SeekFrom::Start(cursor)).is_err() {
            return Ok((false, Some(header), Vec::new(), file_len));
        }
        let mut prefix = [0u8; RECORD_PREFIX_LEN as usize];
        if file.read_exact(&mut prefix).is_err() {
            return Ok((false, Some(header), Vec::new(), file_len));
        }
        let magic = u32::from_be_bytes(prefix[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Ok((false, Some(header), Vec::new(), file_len));
        }
        let len = u32::from_be_bytes(prefix[4..8].try_into().unwrap());
        let record_end = cursor + RECORD_PREFIX_LEN + u64::from(len);
        if record_end > file_len {
            return Ok((false, Some(header), Vec::new(), file_len));
        }
        offsets.push(cursor);
        cursor = record_end;
    }
    Ok((true, Some(header), offsets, file_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_reopen_round_trips_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        let tx_id = TxId::new();
        {
            let mut backing = FileBacking::create(&path, tx_id).unwrap();
            backing.append_body(b"hello").unwrap();
        }
        let reopened = FileBacking::open_existing(&path, Some(tx_id)).unwrap();
        assert_eq!(reopened.tx_id(), tx_id);
        assert_eq!(reopened.mode(), Mode::Undo);
        assert_eq!(reopened.positions(false).len(), 1);
    }

    #[test]
    fn reopen_rejects_tx_id_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        FileBacking::create(&path, TxId::new()).unwrap();
        let err = FileBacking::open_existing(&path, Some(TxId::new())).unwrap_err();
        assert!(matches!(err, OpLogError::StateError(_)));
    }

    #[test]
    fn truncated_record_fails_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        {
            let mut backing = FileBacking::create(&path, TxId::new()).unwrap();
            backing.append_body(b"hello world").unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();
        let (valid, ..) = validate_file(&path).unwrap();
        assert!(!valid);
    }

    #[test]
    fn truncate_to_captured_position_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mut backing = FileBacking::create(&path, TxId::new()).unwrap();
        backing.append_body(b"one").unwrap();
        let save = backing.position();
        backing.append_body(b"two").unwrap();
        backing.append_body(b"three").unwrap();
        backing.truncate(save).unwrap();
        assert_eq!(backing.position(), save);
        assert_eq!(backing.positions(false).len(), 1);
    }
}
