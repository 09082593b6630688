//! Directory/lock-file bookkeeping for the file-backed log store.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{OpLogError, Result};
use crate::log::file::validate_file;
use crate::tx_id::TxId;

const LOCK_FILE_NAME: &str = "transactions.lock";
const LOG_EXTENSION: &str = "log";

pub(crate) struct FileStoreBacking {
    dir: PathBuf,
    lock_file: Option<File>,
    open_tx_ids: HashSet<TxId>,
}

impl FileStoreBacking {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), lock_file: None, open_tx_ids: HashSet::new() }
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE_NAME)
    }

    pub(crate) fn log_path(&self, tx_id: TxId) -> PathBuf {
        self.dir.join(format!("{}.{LOG_EXTENSION}", tx_id.to_filename_stem()))
    }

    /// Acquires exclusive ownership of the directory and returns the set
    /// of `.log` files found, split into (valid_tx_ids, invalid_paths).
    pub(crate) fn acquire(&mut self) -> Result<(Vec<TxId>, Vec<PathBuf>)> {
        if self.lock_file.is_some() {
            return Err(OpLogError::state("store already open"));
        }
        fs::create_dir_all(&self.dir).map_err(|e| OpLogError::io_at(&self.dir, e))?;
        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new().write(true).create_new(true).open(&lock_path).map_err(
            |e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    OpLogError::state(format!(
                        "another process holds the lock at {}",
                        lock_path.display()
                    ))
                } else {
                    OpLogError::io_at(&lock_path, e)
                }
            },
        )?;
        self.lock_file = Some(lock_file);
        self.scan()
    }

    fn scan(&self) -> Result<(Vec<TxId>, Vec<PathBuf>)> {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| OpLogError::io_at(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| OpLogError::io_at(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let (is_valid, header, _, _) = validate_file(&path)?;
            match (is_valid, header) {
                (true, Some(header)) => valid.push(header.tx_id),
                _ => invalid.push(path),
            }
        }
        Ok((valid, invalid))
    }

    pub(crate) fn rescan_and_prune(&self) -> Result<HashSet<TxId>> {
        let (valid, invalid) = self.scan()?;
        for path in invalid {
            fs::remove_file(&path).map_err(|e| OpLogError::io_at(&path, e))?;
        }
        Ok(valid.into_iter().collect())
    }

    pub(crate) fn release(&mut self, _simulate_crash: bool) -> Result<()> {
        self.open_tx_ids.clear();
        if let Some(lock_file) = self.lock_file.take() {
            drop(lock_file);
            let lock_path = self.lock_path();
            // The lock file itself is never meaningful log data; removing it
            // is safe and lets a future `acquire` succeed without leftover
            // state, regardless of whether this close simulates a crash.
            if let Err(e) = fs::remove_file(&lock_path) {
                if e.kind() != ErrorKind::NotFound {
                    return Err(OpLogError::io_at(&lock_path, e));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn mark_open(&mut self, tx_id: TxId) -> Result<()> {
        if !self.open_tx_ids.insert(tx_id) {
            return Err(OpLogError::state(format!("log {tx_id} is already open")));
        }
        Ok(())
    }

    pub(crate) fn mark_closed(&mut self, tx_id: TxId) {
        self.open_tx_ids.remove(&tx_id);
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}
