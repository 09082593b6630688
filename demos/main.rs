//! Drives the six end-to-end scenarios from this crate's design document
//! against a toy accumulator resource. Not part of the library's public
//! surface — a runnable companion to the test suite, the way the teacher
//! keeps its own runnable demonstrations outside the library crate.

use std::fs::OpenOptions;
use std::time::Duration;

use anyhow::{Context, Result};
use opslog::{AccumulatorResource, CoordinatorConfig, LogStore, Operation, TransactionCoordinator};
use tempfile::tempdir;

fn op(v: i32) -> Operation<i32> {
    Operation { description: None, payload: v }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("1. commit happy path");
    scenario_commit_happy_path()?;
    println!("2. base rollback");
    scenario_base_rollback()?;
    println!("3. nested rollback");
    scenario_nested_rollback()?;
    println!("4. crash after commit flip");
    scenario_crash_after_commit_flip()?;
    println!("5. crash mid-append");
    scenario_crash_mid_append()?;
    println!("6. corrupt file on restart");
    scenario_corrupt_file_on_restart()?;

    println!("all scenarios completed");
    Ok(())
}

fn scenario_commit_happy_path() -> Result<()> {
    let resource = AccumulatorResource::new();
    let coordinator = TransactionCoordinator::with_defaults(resource.clone(), LogStore::memory());
    coordinator.start()?;
    let tx = coordinator.begin_transaction()?;
    for v in [3, 5, 7] {
        tx.write(&op(v))?;
    }
    tx.commit()?;
    coordinator.stop(Duration::from_millis(0))?;
    println!("   accumulator = {} (expected 15)", resource.value());
    Ok(())
}

fn scenario_base_rollback() -> Result<()> {
    let resource = AccumulatorResource::new();
    let coordinator = TransactionCoordinator::with_defaults(resource.clone(), LogStore::memory());
    coordinator.start()?;
    let tx = coordinator.begin_transaction()?;
    for v in [1, 2, 3] {
        tx.write(&op(v))?;
    }
    tx.rollback()?;
    coordinator.stop(Duration::from_millis(0))?;
    println!("   accumulator = {} (expected 0)", resource.value());
    Ok(())
}

fn scenario_nested_rollback() -> Result<()> {
    let resource = AccumulatorResource::new();
    let coordinator = TransactionCoordinator::with_defaults(resource.clone(), LogStore::memory());
    coordinator.start()?;
    let outer = coordinator.begin_transaction()?;
    outer.write(&op(10))?;
    let inner = outer.begin_nested()?;
    inner.write(&op(20))?;
    inner.write(&op(30))?;
    inner.rollback()?;
    outer.commit()?;
    coordinator.stop(Duration::from_millis(0))?;
    println!("   accumulator = {} (expected 10)", resource.value());
    Ok(())
}

/// Commits normally, then reopens the same directory to show recovery
/// finding the log already in REDO mode behaves identically to the
/// non-crashing path (§9's unification of commit and crash recovery).
fn scenario_crash_after_commit_flip() -> Result<()> {
    let resource = AccumulatorResource::new();
    let dir = tempdir().context("creating scratch directory")?;
    {
        let coordinator =
            TransactionCoordinator::with_defaults(resource.clone(), LogStore::file(dir.path()));
        coordinator.start()?;
        let tx = coordinator.begin_transaction()?;
        for v in [3, 5, 7] {
            tx.write(&op(v))?;
        }
        tx.commit()?;
        coordinator.stop(Duration::from_millis(0))?;
    }
    let coordinator =
        TransactionCoordinator::with_defaults(resource.clone(), LogStore::file(dir.path()));
    coordinator.start()?;
    coordinator.stop(Duration::from_millis(0))?;
    println!("   accumulator = {} (expected 15, matching a non-crashing commit)", resource.value());
    Ok(())
}

/// Abandons a transaction mid-append (the coordinator is dropped without
/// `stop` draining it cleanly) and shows a fresh coordinator's recovery
/// unwinding it on the next start.
fn scenario_crash_mid_append() -> Result<()> {
    let resource = AccumulatorResource::new();
    let dir = tempdir().context("creating scratch directory")?;
    {
        let coordinator = TransactionCoordinator::with_defaults(
            resource.clone(),
            LogStore::file(dir.path()),
        );
        coordinator.start()?;
        let tx = coordinator.begin_transaction()?;
        for v in [1, 2, 3] {
            tx.write(&op(v))?;
        }
        println!("   accumulator before crash = {}", resource.value());
        std::mem::forget(tx);
        coordinator.stop(Duration::from_millis(0))?;
    }
    let coordinator =
        TransactionCoordinator::with_defaults(resource.clone(), LogStore::file(dir.path()));
    coordinator.start()?;
    coordinator.stop(Duration::from_millis(0))?;
    println!("   accumulator after recovery = {} (expected 0)", resource.value());
    Ok(())
}

fn scenario_corrupt_file_on_restart() -> Result<()> {
    let resource = AccumulatorResource::new();
    let dir = tempdir().context("creating scratch directory")?;
    {
        let coordinator =
            TransactionCoordinator::with_defaults(resource.clone(), LogStore::file(dir.path()));
        coordinator.start()?;
        let tx = coordinator.begin_transaction()?;
        tx.write(&op(42))?;
        std::mem::forget(tx);
        coordinator.stop(Duration::from_millis(0))?;
    }

    let log_path = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| path.extension().map(|ext| ext == "log").unwrap_or(false))
        .context("expected exactly one leftover log file")?;
    let len = std::fs::metadata(&log_path)?.len();
    let file = OpenOptions::new().write(true).open(&log_path)?;
    file.set_len(len - 2).context("truncating the last record by two bytes")?;

    let strict_config = CoordinatorConfig { recover_corrupt: false, ..CoordinatorConfig::default() };
    let strict = TransactionCoordinator::new(
        resource.clone(),
        LogStore::file(dir.path()),
        strict_config,
    );
    match strict.start() {
        Ok(()) => anyhow::bail!("expected start to refuse a corrupt log with recover_corrupt = false"),
        Err(e) => println!("   start with recover_corrupt = false refused to start: {e}"),
    }

    let lenient_config = CoordinatorConfig { recover_corrupt: true, ..CoordinatorConfig::default() };
    let lenient =
        TransactionCoordinator::new(resource.clone(), LogStore::file(dir.path()), lenient_config);
    lenient.start()?;
    lenient.stop(Duration::from_millis(0))?;
    println!("   start with recover_corrupt = true deleted the corrupt log and proceeded");
    Ok(())
}
