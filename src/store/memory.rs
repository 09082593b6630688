//! Registry bookkeeping for the in-memory log store.
//!
//! Unlike the file-backed store there is no persistence substrate beneath
//! this one: the registry is just a `HashMap` that lives as long as the
//! owning `LogStore` does. A fresh `MemoryStoreBacking` therefore always
//! starts with nothing to recover, which is exactly what the spec calls
//! for ("a crash simulation has no effect... orphan scan always returns
//! empty").

use std::collections::{HashMap, HashSet};

use crate::error::{OpLogError, Result};
use crate::log::Backing;
use crate::tx_id::TxId;

pub(crate) struct MemoryStoreBacking {
    open_tx_ids: HashSet<TxId>,
    registry: HashMap<TxId, Backing>,
}

impl MemoryStoreBacking {
    pub(crate) fn new() -> Self {
        Self { open_tx_ids: HashSet::new(), registry: HashMap::new() }
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

    pub(crate) fn check_in(&mut self, tx_id: TxId, backing: Backing) {
        self.registry.insert(tx_id, backing);
    }

    pub(crate) fn check_out(&mut self, tx_id: TxId) -> Result<Backing> {
        self.registry
            .remove(&tx_id)
            .ok_or_else(|| OpLogError::not_found(format!("no in-memory log for {tx_id}")))
    }

    pub(crate) fn drop_registered(&mut self, tx_id: TxId) {
        self.registry.remove(&tx_id);
    }

    pub(crate) fn reset(&mut self) {
        self.open_tx_ids.clear();
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_in_then_check_out_round_trips() {
        let mut store = MemoryStoreBacking::new();
        let tx_id = TxId::new();
        let backing = crate::log::new_memory_backing(tx_id);
        store.check_in(tx_id, backing);
        let got = store.check_out(tx_id).unwrap();
        assert_eq!(got.tx_id(), tx_id);
        assert!(store.check_out(tx_id).is_err());
    }
}
