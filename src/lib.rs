#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::correctness,
    clippy::suspicious,
    deprecated,
    unused,
    clippy::todo,
    clippy::unimplemented,
    clippy::unreachable,
    clippy::missing_safety_doc
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! # opslog - a crash-safe operation-log engine
//!
//! `opslog` gives a single external resource crash-safe, nested
//! transactions on top of a per-transaction undo/redo log. A caller opens
//! a [`TransactionCoordinator`] over a [`LogStore`] and an adapter
//! implementing [`ResourceAdapter`], begins a [`Transaction`], appends
//! operations to it, and commits or rolls it back — including arbitrarily
//! nested save-points within a single base transaction.
//!
//! ## Quick start
//!
//! ```
//! use opslog::{AccumulatorResource, LogStore, Operation, TransactionCoordinator};
//!
//! # fn main() -> opslog::Result<()> {
//! let coordinator = TransactionCoordinator::with_defaults(
//!     AccumulatorResource::new(),
//!     LogStore::memory(),
//! );
//! coordinator.start()?;
//!
//! let tx = coordinator.begin_transaction()?;
//! tx.write(&Operation { description: Some("deposit".into()), payload: 100 })?;
//! tx.commit()?;
//!
//! coordinator.stop(std::time::Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Operation Log** ([`OperationLog`]) — one undo/redo log per base
//!   transaction, file- or memory-backed, framed as fixed headers and
//!   length-prefixed records.
//! - **Log Store** ([`LogStore`]) — the collection of per-`TxId` logs, and
//!   the directory lock / orphan scan a coordinator uses at startup to
//!   find crash survivors.
//! - **Log Position** ([`LogPosition`]) — an opaque save-point anchor,
//!   comparable only against positions from the same log.
//! - **Transaction Coordinator** ([`TransactionCoordinator`]) — begin,
//!   write, commit, rollback, and the recovery driver run at `start`.
//! - **Nested Transaction Stack** — save-point bookkeeping within a single
//!   base transaction, returned to callers as [`SavePointId`]s.
//! - **Resource Adapter** ([`ResourceAdapter`]) — the capability trait an
//!   external resource implements so the coordinator can drive it.
//!
//! See `SPEC_FULL.md` in the repository root for the full component design
//! and the end-to-end scenarios this crate's test suite is built from.

mod accumulator;
mod adapter;
mod config;
mod coordinator;
mod error;
mod log;
mod nested;
mod position;
mod record;
mod store;
mod tx_id;

pub use accumulator::AccumulatorResource;
pub use adapter::{CoordinatorInfo, Phase, ResourceAdapter, UpdateContext};
pub use config::CoordinatorConfig;
pub use coordinator::{Transaction, TransactionCoordinator};
pub use error::{OpLogError, Result};
pub use log::OperationLog;
pub use nested::SavePointId;
pub use position::LogPosition;
pub use record::{Mode, Operation};
pub use store::{LogStore, StoreOpenStatus};
pub use tx_id::TxId;
