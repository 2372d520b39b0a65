use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use uuid::Uuid;

/// What a broadcast transaction was meant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ApproveToOpen,
    OpenOffer,
    CancelOffer,
    EditOffer,
    ApproveToTake,
    TakeOffer,
    ApproveToFill,
    FillSwap,
    ReportPaymentSent,
    ReportPaymentReceived,
    CloseSwap,
}

impl TransactionKind {
    pub fn is_offer_action(self) -> bool {
        matches!(
            self,
            TransactionKind::ApproveToOpen
                | TransactionKind::OpenOffer
                | TransactionKind::CancelOffer
                | TransactionKind::EditOffer
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTransaction {
    pub hash: B256,
    pub kind: TransactionKind,
    /// Offer or swap the transaction acts on.
    pub entity_id: Uuid,
    pub chain_id: u64,
    pub created_at: Instant,
}

impl MonitoredTransaction {
    pub fn new(hash: B256, kind: TransactionKind, entity_id: Uuid, chain_id: u64) -> Self {
        Self {
            hash,
            kind,
            entity_id,
            chain_id,
            created_at: Instant::now(),
        }
    }
}

/// Transactions broadcast by this engine that have not been seen in a block yet.
#[derive(Debug, Clone, Default)]
pub struct TransactionMonitor {
    inner: Arc<Mutex<HashMap<B256, MonitoredTransaction>>>,
}

impl TransactionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, tx: MonitoredTransaction) {
        tracing::debug!(tx_hash = %tx.hash, kind = ?tx.kind, entity_id = %tx.entity_id, "monitoring transaction");
        self.with_map(|map| {
            map.insert(tx.hash, tx);
        });
    }

    pub fn get(&self, hash: &B256) -> Option<MonitoredTransaction> {
        self.with_map(|map| map.get(hash).cloned())
    }

    pub fn remove(&self, hash: &B256) -> Option<MonitoredTransaction> {
        self.with_map(|map| map.remove(hash))
    }

    pub fn len(&self) -> usize {
        self.with_map(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every transaction pending for longer than `timeout`.
    pub fn take_expired(&self, timeout: Duration, now: Instant) -> Vec<MonitoredTransaction> {
        self.with_map(|map| {
            let expired: Vec<B256> = map
                .values()
                .filter(|tx| now.saturating_duration_since(tx.created_at) >= timeout)
                .map(|tx| tx.hash)
                .collect();
            expired.iter().filter_map(|h| map.remove(h)).collect()
        })
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<B256, MonitoredTransaction>) -> T) -> T {
        // The map holds no invariant a panicking writer could break halfway.
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
