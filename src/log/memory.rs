//! In-memory log storage: the behavioral twin of `FileBacking` without I/O.

use crate::error::{OpLogError, Result};
use crate::position::LogPosition;
use crate::record::Mode;
use crate::tx_id::TxId;

pub(crate) struct MemoryBacking {
    tx_id: TxId,
    mode: Mode,
    records: Vec<Vec<u8>>,
}

impl MemoryBacking {
    pub(crate) fn create(tx_id: TxId) -> Self {
        Self { tx_id, mode: Mode::Undo, records: Vec::new() }
    }

    pub(crate) fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    pub(crate) fn position(&self) -> LogPosition {
        LogPosition::Index(self.records.len())
    }

    pub(crate) fn truncate(&mut self, pos: LogPosition) -> Result<()> {
        let idx =
            pos.as_index().ok_or_else(|| OpLogError::invalid("truncate position is not an index"))?;
        if idx > self.records.len() {
            return Err(OpLogError::invalid("truncate position past current append point"));
        }
        self.records.truncate(idx);
        Ok(())
    }

    pub(crate) fn positions(&self, reverse: bool) -> Vec<LogPosition> {
        let mut indices: Vec<usize> = (0..self.records.len()).collect();
        if reverse {
            indices.reverse();
        }
        indices.into_iter().map(LogPosition::Index).collect()
    }

    pub(crate) fn positions_to(&self, pos: LogPosition) -> Result<Vec<LogPosition>> {
        let idx = pos.as_index().ok_or_else(|| OpLogError::invalid("position is not an index"))?;
        Ok((0..self.records.len())
            .filter(|&i| i >= idx)
            .rev()
            .map(LogPosition::Index)
            .collect())
    }

    pub(crate) fn append_body(&mut self, body: &[u8]) -> Result<()> {
        self.records.push(body.to_vec());
        Ok(())
    }

    pub(crate) fn read_body(&mut self, pos: LogPosition) -> Result<Vec<u8>> {
        let idx = pos.as_index().ok_or_else(|| OpLogError::invalid("position is not an index"))?;
        self.records
            .get(idx)
            .cloned()
            .ok_or_else(|| OpLogError::invalid(format!("no record at index {idx}")))
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
