//! A toy resource adapter used by this crate's own tests and by the
//! `demos/` CLI harness: an accumulator where `redo(x)` adds `x` and
//! `undo(x)` subtracts `x`, applied eagerly as each operation is written
//! and unwound on rollback or recovery. Payloads are a single
//! little-endian `i32`, per the end-to-end scenarios this adapter exists
//! to drive.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::adapter::{ResourceAdapter, UpdateContext};
use crate::error::{OpLogError, Result};
use crate::record::Operation;

/// An accumulator resource. `Clone` is a cheap handle to the same
/// underlying total, the way a real adapter's handle to a database
/// connection would be — this is what lets a test (or a caller recovering
/// from a real process restart) hold onto the same resource across a
/// `TransactionCoordinator` being torn down and rebuilt.
#[derive(Debug, Default, Clone)]
pub struct AccumulatorResource {
    total: Arc<AtomicI64>,
}

impl AccumulatorResource {
    #[must_use]
    pub fn new() -> Self {
        Self { total: Arc::new(AtomicI64::new(0)) }
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl ResourceAdapter for AccumulatorResource {
    type Payload = i32;

    fn name(&self) -> &str {
        "accumulator"
    }

    fn begin_recovery(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
        Ok(())
    }

    fn end_recovery(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
        Ok(())
    }

    fn begin_undo(&mut self, _ctx: &UpdateContext<'_>) -> Result<bool> {
        Ok(true)
    }

    fn undo(&mut self, _ctx: &UpdateContext<'_>, op: &Operation<Self::Payload>) -> Result<()> {
        self.total.fetch_sub(i64::from(op.payload), Ordering::SeqCst);
        Ok(())
    }

    fn end_undo(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
        Ok(())
    }

    fn begin_redo(&mut self, _ctx: &UpdateContext<'_>) -> Result<bool> {
        // The coordinator applies `redo` eagerly as each operation is
        // written (see `TransactionCoordinator::write`), so by the time
        // anything asks to replay a REDO-mode log the effect is already
        // live. Declining here means a normal commit's forward walk, and a
        // crash found mid-flip during recovery, are both no-ops beyond the
        // bookkeeping that flips the log's mode and deletes it.
        Ok(false)
    }

    fn redo(&mut self, _ctx: &UpdateContext<'_>, op: &Operation<Self::Payload>) -> Result<()> {
        self.total.fetch_add(i64::from(op.payload), Ordering::SeqCst);
        Ok(())
    }

    fn end_redo(&mut self, _ctx: &UpdateContext<'_>) -> Result<()> {
        Ok(())
    }

    fn read_operation(&self, reader: &mut dyn Read) -> Result<Self::Payload> {
        let mut buf = [0u8; 4];
        reader
            .read_exact(&mut buf)
            .map_err(|e| OpLogError::corrupt(format!("short accumulator payload: {e}")))?;
        Ok(i32::from_le_bytes(buf))
    }

    fn write_operation(&self, writer: &mut dyn Write, payload: &Self::Payload) -> Result<()> {
        writer.write_all(&payload.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(AccumulatorResource::new().value(), 0);
    }

    #[test]
    fn redo_adds_undo_subtracts() {
        let res = AccumulatorResource::new();
        res.total.fetch_add(10, Ordering::SeqCst);
        res.total.fetch_sub(3, Ordering::SeqCst);
        assert_eq!(res.value(), 7);
    }
}
