//! 128-bit transaction identifiers.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// A 128-bit universally-unique value assigned when a base transaction
/// begins. Immutable for the life of the log; used as the log's filename
/// for persistent stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(Uuid);

impl TxId {
    /// Generates a fresh, random transaction identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil identifier, used for `UpdateContext` calls made outside the
    /// scope of a specific transaction (e.g. the recovery brackets).
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// The canonical 36-character textual form, used as a log file stem.
    #[must_use]
    pub fn to_filename_stem(self) -> String {
        self.0.to_string()
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for TxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TxId> for Uuid {
    fn from(tx_id: TxId) -> Self {
        tx_id.0
    }
}

impl TxId {
    /// Raw 16-byte big-endian representation, as persisted in a log header.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Reconstructs a `TxId` from its 16-byte representation.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let id = TxId::new();
        assert_eq!(TxId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn nil_is_distinct_from_fresh() {
        assert_ne!(TxId::nil(), TxId::new());
    }

    #[test]
    fn filename_stem_round_trips_through_display() {
        let id = TxId::new();
        assert_eq!(id.to_filename_stem(), id.to_string());
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn ordering_is_total() {
        let a = TxId::new();
        let b = TxId::new();
        assert!(a == a);
        assert!((a < b) != (b < a) || a == b);
    }
}
