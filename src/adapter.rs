//! The contract an external "transacted resource" implements so the
//! coordinator can drive undo, redo, and recovery against it.
//!
//! Modeled as a single capability trait selected at construction time —
//! the same shape as the teacher crate's `KeyValueStore<K, V>` trait — rather
//! than a class hierarchy of log/resource variants.

use std::any::Any;
use std::cell::RefCell;
use std::io::{Read, Write};

use crate::error::Result;
use crate::record::Operation;
use crate::tx_id::TxId;

/// Which bracket of the undo/redo/recovery protocol a given callback call
/// belongs to. Mutually exclusive for any single call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Driven from `TransactionCoordinator::start`'s recovery walk.
    Recovery,
    /// Driven from a commit's forward redo walk.
    Commit,
    /// Driven from a rollback's reverse undo walk.
    Rollback,
}

/// A read-only snapshot of coordinator configuration visible to adapter
/// callbacks. Deliberately not a live handle back into the coordinator:
/// the coordinator is behind its own mutex while driving a callback, so
/// handing back a reentrant handle would risk deadlock on the very lock
/// the callback was invoked under.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorInfo {
    pub thread_affine: bool,
}

/// The per-call envelope passed to every adapter callback.
pub struct UpdateContext<'a> {
    pub coordinator: &'a CoordinatorInfo,
    pub phase: Phase,
    /// Nil for recovery-phase calls made outside a specific transaction
    /// (the begin/end-recovery brackets).
    pub tx_id: TxId,
    slot: RefCell<Option<Box<dyn Any + Send>>>,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(coordinator: &'a CoordinatorInfo, phase: Phase, tx_id: TxId) -> Self {
        Self { coordinator, phase, tx_id, slot: RefCell::new(None) }
    }

    /// Stores adapter-owned state in the per-call-sequence slot, threading
    /// it from a `begin_*` callback through the per-record steps to the
    /// matching `end_*` callback.
    pub fn put_slot<T: Any + Send>(&self, value: T) {
        *self.slot.borrow_mut() = Some(Box::new(value));
    }

    /// Removes and returns the slot's contents, if any was stored and its
    /// type matches `T`.
    #[must_use]
    pub fn take_slot<T: Any + Send>(&self) -> Option<T> {
        let boxed = self.slot.borrow_mut().take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                *self.slot.borrow_mut() = Some(boxed);
                None
            }
        }
    }
}

/// The capability set an external resource implements.
///
/// `undo`/`redo` **must tolerate repeated application** to the same logical
/// state: a crash may occur at any step of recovery and the coordinator
/// does not memoize progress across restarts.
pub trait ResourceAdapter {
    /// The resource-owned payload type stored in each record.
    type Payload;

    /// A diagnostic name used in log output.
    fn name(&self) -> &str;

    /// Brackets the recovery cycle. May fail if persistent state is too
    /// damaged to proceed at all.
    fn begin_recovery(&mut self, ctx: &UpdateContext<'_>) -> Result<()>;
    fn end_recovery(&mut self, ctx: &UpdateContext<'_>) -> Result<()>;

    /// Brackets a reverse (undo) walk. Returning `false` lets the adapter
    /// skip the per-record `undo` calls entirely, e.g. when it can restore
    /// from a snapshot instead.
    fn begin_undo(&mut self, ctx: &UpdateContext<'_>) -> Result<bool>;
    fn undo(&mut self, ctx: &UpdateContext<'_>, op: &Operation<Self::Payload>) -> Result<()>;
    fn end_undo(&mut self, ctx: &UpdateContext<'_>) -> Result<()>;

    /// Brackets a forward (redo) walk; dual of the undo triple above.
    fn begin_redo(&mut self, ctx: &UpdateContext<'_>) -> Result<bool>;
    fn redo(&mut self, ctx: &UpdateContext<'_>, op: &Operation<Self::Payload>) -> Result<()>;
    fn end_redo(&mut self, ctx: &UpdateContext<'_>) -> Result<()>;

    /// Deserializes a payload previously written by `write_operation`. Must
    /// read exactly the bytes written; the log tolerates drift on reads by
    /// repositioning, but logs a warning when it has to.
    fn read_operation(&self, reader: &mut dyn Read) -> Result<Self::Payload>;

    /// Serializes a payload. Must advance `writer` by exactly the bytes it
    /// writes — the description field is not part of this payload, the log
    /// owns that framing separately.
    fn write_operation(&self, writer: &mut dyn Write, payload: &Self::Payload) -> Result<()>;
}
