//! Append-only audit ledger of order status changes.
//!
//! The ledger lives in its own tree so the trail survives even if an order
//! document is later hard-deleted by an admin. Appends are decoupled from the
//! order write: a failed append degrades auditability but never rolls back
//! the transition that produced it (the caller reports the failure instead).

use crate::error::StorageError;
use crate::order::OrderStatus;
use crate::types::{Actor, TimeStamp};
use chrono::Utc;

/// One immutable record of a single status change.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct HistoryEntry {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub status: OrderStatus,
    #[n(2)]
    pub actor: Actor,
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
    #[n(4)]
    pub proof_ref: Option<String>,
    /// Set on admin manual overrides to explain the jump.
    #[n(5)]
    pub note: Option<String>,
}

pub struct AuditLedger {
    tree: sled::Tree,
}

impl AuditLedger {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree("ledger")?,
        })
    }

    /// Entry keys sort by `(order_id, seq)` so a prefix scan replays the
    /// history in append order. `seq` is the entry's index in the order's
    /// denormalized history, which the atomic order write made unique.
    fn key(order_id: &str, seq: u64) -> Vec<u8> {
        format!("{order_id}:{seq:06}").into_bytes()
    }

    pub fn append(&self, entry: &HistoryEntry, seq: u64) -> Result<(), StorageError> {
        let cbor = minicbor::to_vec(entry).map_err(StorageError::encode)?;
        self.tree.insert(Self::key(&entry.order_id, seq), cbor)?;
        Ok(())
    }

    /// Every recorded status change for one order, oldest first.
    pub fn history_for(&self, order_id: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(format!("{order_id}:").as_bytes()) {
            let (_, raw) = item?;
            entries.push(minicbor::decode(raw.as_ref())?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(order_id: &str, status: OrderStatus) -> HistoryEntry {
        HistoryEntry {
            order_id: order_id.into(),
            status,
            actor: Actor::System,
            timestamp: TimeStamp::new_with(2025, 5, 2, 10, 0, 0),
            proof_ref: None,
            note: None,
        }
    }

    #[test]
    fn replays_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger.db")).unwrap();
        let ledger = AuditLedger::open(&db).unwrap();

        ledger.append(&entry("ORD-a", OrderStatus::Draft), 0).unwrap();
        ledger.append(&entry("ORD-a", OrderStatus::Pending), 1).unwrap();
        ledger
            .append(&entry("ORD-a", OrderStatus::WaitingVerification), 2)
            .unwrap();

        let history = ledger.history_for("ORD-a").unwrap();
        let statuses: Vec<_> = history.iter().map(|e| e.status).collect();

        assert_eq!(
            statuses,
            vec![
                OrderStatus::Draft,
                OrderStatus::Pending,
                OrderStatus::WaitingVerification
            ]
        );
    }

    #[test]
    fn orders_do_not_bleed_into_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger.db")).unwrap();
        let ledger = AuditLedger::open(&db).unwrap();

        ledger.append(&entry("ORD-a", OrderStatus::Draft), 0).unwrap();
        ledger.append(&entry("ORD-b", OrderStatus::Draft), 0).unwrap();

        assert_eq!(ledger.history_for("ORD-a").unwrap().len(), 1);
        assert_eq!(ledger.history_for("ORD-b").unwrap().len(), 1);
    }

    #[test]
    fn entry_encoding() {
        let original = HistoryEntry {
            order_id: "ORD-x".into(),
            status: OrderStatus::Expired,
            actor: Actor::System,
            timestamp: TimeStamp::new(),
            proof_ref: Some("proofs/abc.jpg".into()),
            note: Some("deadline passed".into()),
        };

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: HistoryEntry = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
