//! A single transaction's ordered operation sequence with crash-safe
//! framing (spec §4.1), backed by either a file or an in-memory buffer.
//!
//! The two backings are a tagged union rather than a trait-object
//! hierarchy, per the redesign note in spec §9: `OperationLog` owns the
//! shared framing/validation logic once, and dispatches the low-level
//! byte storage to whichever concrete `Backing` variant it holds.

mod file;
mod memory;

use std::io::Cursor;

use log::warn;

use crate::adapter::ResourceAdapter;
use crate::error::{OpLogError, Result};
use crate::position::LogPosition;
use crate::record::{decode_description, encode_description, Mode, Operation};
use crate::tx_id::TxId;

use file::FileBacking;
use memory::MemoryBacking;

pub(crate) enum Backing {
    File(FileBacking),
    Memory(MemoryBacking),
}

impl Backing {
    pub(crate) fn tx_id(&self) -> TxId {
        match self {
            Self::File(b) => b.tx_id(),
            Self::Memory(b) => b.tx_id(),
        }
    }

    fn mode(&self) -> Mode {
        match self {
            Self::File(b) => b.mode(),
            Self::Memory(b) => b.mode(),
        }
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        match self {
            Self::File(b) => b.set_mode(mode),
            Self::Memory(b) => b.set_mode(mode),
        }
    }

    fn position(&self) -> LogPosition {
        match self {
            Self::File(b) => b.position(),
            Self::Memory(b) => b.position(),
        }
    }

    fn truncate(&mut self, pos: LogPosition) -> Result<()> {
        match self {
            Self::File(b) => b.truncate(pos),
            Self::Memory(b) => b.truncate(pos),
        }
    }

    fn positions(&self, reverse: bool) -> Vec<LogPosition> {
        match self {
            Self::File(b) => b.positions(reverse),
            Self::Memory(b) => b.positions(reverse),
        }
    }

    fn positions_to(&self, pos: LogPosition) -> Result<Vec<LogPosition>> {
        match self {
            Self::File(b) => b.positions_to(pos),
            Self::Memory(b) => b.positions_to(pos),
        }
    }

    fn append_body(&mut self, body: &[u8]) -> Result<()> {
        match self {
            Self::File(b) => b.append_body(body),
            Self::Memory(b) => b.append_body(body),
        }
    }

    fn read_body(&mut self, pos: LogPosition) -> Result<Vec<u8>> {
        match self {
            Self::File(b) => b.read_body(pos),
            Self::Memory(b) => b.read_body(pos),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::File(b) => b.close(),
            Self::Memory(b) => b.close(),
        }
    }

    pub(crate) fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(b) => Some(b.path()),
            Self::Memory(_) => None,
        }
    }
}

/// Creates a fresh in-memory backing for `tx_id`. Used by the in-memory
/// log store, which otherwise has no way to construct a `Backing` of its
/// own (the concrete backing types are private to this module).
pub(crate) fn new_memory_backing(tx_id: TxId) -> Backing {
    Backing::Memory(MemoryBacking::create(tx_id))
}

/// Creates a brand-new file-backed log at `path`. Used by the file-backed
/// log store.
pub(crate) fn new_file_backing(path: &std::path::Path, tx_id: TxId) -> Result<Backing> {
    Ok(Backing::File(FileBacking::create(path, tx_id)?))
}

/// Reopens an existing file-backed log at `path`, optionally checking its
/// header against `expected_tx_id`.
pub(crate) fn open_file_backing(
    path: &std::path::Path,
    expected_tx_id: Option<TxId>,
) -> Result<Backing> {
    Ok(Backing::File(FileBacking::open_existing(path, expected_tx_id)?))
}

/// A single base transaction's append/read/truncate log.
pub struct OperationLog<A: ResourceAdapter> {
    pub(crate) backing: Backing,
    closed: bool,
    _adapter: std::marker::PhantomData<A>,
}

impl<A: ResourceAdapter> OperationLog<A> {
    pub(crate) fn from_backing(backing: Backing) -> Self {
        Self { backing, closed: false, _adapter: std::marker::PhantomData }
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(OpLogError::state("operation log is closed"));
        }
        Ok(())
    }

    fn require_undo(&self) -> Result<()> {
        self.require_open()?;
        if self.backing.mode() != Mode::Undo {
            return Err(OpLogError::state("operation requires UNDO mode"));
        }
        Ok(())
    }

    /// The transaction this log belongs to.
    #[must_use]
    pub fn tx_id(&self) -> TxId {
        self.backing.tx_id()
    }

    /// The current UNDO/REDO discriminator.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.backing.mode()
    }

    /// Writes a new mode, flushing the header byte group before returning.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.require_open()?;
        self.backing.set_mode(mode)
    }

    /// The current append point. Valid only in UNDO mode.
    pub fn position(&self) -> Result<LogPosition> {
        self.require_undo()?;
        Ok(self.backing.position())
    }

    /// Discards everything at or beyond `pos`. Valid only in UNDO mode.
    pub fn truncate(&mut self, pos: LogPosition) -> Result<()> {
        self.require_undo()?;
        self.backing.truncate(pos)
    }

    /// Log positions for every record, in append order or its reverse.
    pub fn positions(&self, reverse: bool) -> Result<Vec<LogPosition>> {
        self.require_open()?;
        Ok(self.backing.positions(reverse))
    }

    /// Log positions for every record strictly beyond `pos`, in reverse
    /// append order.
    pub fn positions_to(&self, pos: LogPosition) -> Result<Vec<LogPosition>> {
        self.require_open()?;
        self.backing.positions_to(pos)
    }

    /// Appends a new record. Valid only in UNDO mode.
    pub fn write(&mut self, adapter: &A, op: &Operation<A::Payload>) -> Result<()> {
        self.require_undo()?;
        let desc_bytes = encode_description(&op.description);
        let mut payload_bytes = Vec::new();
        adapter.write_operation(&mut payload_bytes, &op.payload)?;
        let mut body = Vec::with_capacity(desc_bytes.len() + payload_bytes.len());
        body.extend_from_slice(&desc_bytes);
        body.extend_from_slice(&payload_bytes);
        self.backing.append_body(&body)
    }

    /// Seeks to `pos`, validates the record frame, reads the description,
    /// then asks `adapter` to deserialize the payload.
    pub fn read(&mut self, adapter: &A, pos: LogPosition) -> Result<Operation<A::Payload>> {
        self.require_open()?;
        let body = self.backing.read_body(pos)?;
        let (description, consumed) = decode_description(&body)?;
        let payload_region = &body[consumed..];
        let mut cursor = Cursor::new(payload_region);
        let payload = adapter.read_operation(&mut cursor)?;
        if cursor.position() as usize != payload_region.len() {
            warn!(
                "adapter '{}' did not fully consume record payload at {:?} ({} of {} bytes); \
                 repositioning",
                adapter.name(),
                pos,
                cursor.position(),
                payload_region.len()
            );
        }
        Ok(Operation { description, payload })
    }

    /// Releases resources. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.backing.close()?;
        self.closed = true;
        Ok(())
    }

    /// Consumes the handle and hands its backing storage back to the log
    /// store, without running the normal close-on-drop path against it.
    pub(crate) fn into_backing(mut self) -> Backing {
        self.closed = true;
        std::mem::replace(&mut self.backing, Backing::Memory(MemoryBacking::create(TxId::nil())))
    }
}

impl<A: ResourceAdapter> Drop for OperationLog<A> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AccumulatorResource;
    use file::FileBacking as FB;
    use memory::MemoryBacking as MB;
    use tempfile::tempdir;

    fn mem_log() -> OperationLog<AccumulatorResource> {
        OperationLog::from_backing(Backing::Memory(MB::create(TxId::new())))
    }

    #[test]
    fn round_trip_forward_and_reverse() {
        let adapter = AccumulatorResource::new();
        let mut log = mem_log();
        for v in [3, 5, 7] {
            log.write(&adapter, &Operation { description: None, payload: v }).unwrap();
        }
        let forward = log.positions(false).unwrap();
        let values: Vec<i32> =
            forward.iter().map(|&p| log.read(&adapter, p).unwrap().payload).collect();
        assert_eq!(values, vec![3, 5, 7]);

        let reverse = log.positions(true).unwrap();
        let values: Vec<i32> =
            reverse.iter().map(|&p| log.read(&adapter, p).unwrap().payload).collect();
        assert_eq!(values, vec![7, 5, 3]);
    }

    #[test]
    fn truncate_to_append_point_is_noop() {
        let adapter = AccumulatorResource::new();
        let mut log = mem_log();
        log.write(&adapter, &Operation { description: None, payload: 1 }).unwrap();
        let pos = log.position().unwrap();
        log.truncate(pos).unwrap();
        assert_eq!(log.position().unwrap(), pos);
    }

    #[test]
    fn mode_discipline_rejects_write_on_redo() {
        let adapter = AccumulatorResource::new();
        let mut log = mem_log();
        log.set_mode(Mode::Redo).unwrap();
        let err = log.write(&adapter, &Operation { description: None, payload: 1 }).unwrap_err();
        assert!(matches!(err, OpLogError::StateError(_)));
        assert!(log.position().is_err());
        assert!(log.truncate(LogPosition::Index(0)).is_err());
    }

    #[test]
    fn description_round_trips_through_file_backing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.log");
        let tx_id = TxId::new();
        let adapter = AccumulatorResource::new();
        let mut log: OperationLog<AccumulatorResource> =
            OperationLog::from_backing(Backing::File(FB::create(&path, tx_id).unwrap()));
        log.write(&adapter, &Operation { description: Some("deposit".into()), payload: 42 })
            .unwrap();
        let pos = log.positions(false).unwrap()[0];
        let op = log.read(&adapter, pos).unwrap();
        assert_eq!(op.description.as_deref(), Some("deposit"));
        assert_eq!(op.payload, 42);
    }
}
