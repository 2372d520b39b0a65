use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::U256;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::offer::Offer;
use crate::swap::Swap;

/// A change to the in-memory view, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TruthUpdate {
    OfferUpserted { offer: Box<Offer> },
    OfferRemoved { id: Uuid, chain_id: u64 },
    SwapUpserted { swap: Box<Swap> },
    ServiceFeeRateChanged { rate: U256 },
}

#[derive(Default)]
struct Entities {
    offers: HashMap<Uuid, Offer>,
    swaps: HashMap<Uuid, Swap>,
    service_fee_rate: Option<U256>,
}

/// In-memory offers and swaps. Every mutation goes through the one mutex and
/// is published on the update channel; readers get clones.
pub struct TruthSource {
    entities: Mutex<Entities>,
    updates: broadcast::Sender<TruthUpdate>,
}

impl TruthSource {
    pub fn new(update_channel_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(update_channel_capacity.max(1));
        Self {
            entities: Mutex::new(Entities::default()),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TruthUpdate> {
        self.updates.subscribe()
    }

    pub fn offer(&self, id: Uuid) -> Option<Offer> {
        self.entities().offers.get(&id).cloned()
    }

    pub fn offers(&self) -> Vec<Offer> {
        self.entities().offers.values().cloned().collect()
    }

    pub fn swap(&self, id: Uuid) -> Option<Swap> {
        self.entities().swaps.get(&id).cloned()
    }

    pub fn swaps(&self) -> Vec<Swap> {
        self.entities().swaps.values().cloned().collect()
    }

    pub fn service_fee_rate(&self) -> Option<U256> {
        self.entities().service_fee_rate
    }

    pub fn upsert_offer(&self, offer: Offer) {
        let mut entities = self.entities();
        entities.offers.insert(offer.id, offer.clone());
        self.publish(TruthUpdate::OfferUpserted {
            offer: Box::new(offer),
        });
    }

    /// Applies `f` to the offer if present. Returns whether it was.
    pub fn update_offer(&self, id: Uuid, f: impl FnOnce(&mut Offer)) -> bool {
        let mut entities = self.entities();
        let Some(offer) = entities.offers.get_mut(&id) else {
            return false;
        };
        f(offer);
        let offer = Box::new(offer.clone());
        self.publish(TruthUpdate::OfferUpserted { offer });
        true
    }

    /// Removes the offer if it exists on `chain_id`.
    pub fn remove_offer(&self, id: Uuid, chain_id: u64) -> Option<Offer> {
        let mut entities = self.entities();
        if entities.offers.get(&id)?.chain_id != chain_id {
            return None;
        }
        let removed = entities.offers.remove(&id);
        self.publish(TruthUpdate::OfferRemoved { id, chain_id });
        removed
    }

    pub fn upsert_swap(&self, swap: Swap) {
        let mut entities = self.entities();
        entities.swaps.insert(swap.id, swap.clone());
        self.publish(TruthUpdate::SwapUpserted {
            swap: Box::new(swap),
        });
    }

    pub fn update_swap(&self, id: Uuid, f: impl FnOnce(&mut Swap)) -> bool {
        let mut entities = self.entities();
        let Some(swap) = entities.swaps.get_mut(&id) else {
            return false;
        };
        f(swap);
        let swap = Box::new(swap.clone());
        self.publish(TruthUpdate::SwapUpserted { swap });
        true
    }

    pub fn set_service_fee_rate(&self, rate: U256) {
        let mut entities = self.entities();
        entities.service_fee_rate = Some(rate);
        self.publish(TruthUpdate::ServiceFeeRateChanged { rate });
    }

    // Published while the lock is held so subscribers see updates in map order.
    fn publish(&self, update: TruthUpdate) {
        let _ = self.updates.send(update);
    }

    fn entities(&self) -> MutexGuard<'_, Entities> {
        self.entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rate_updates_reach_subscribers() {
        let truth = TruthSource::new(4);
        let mut rx = truth.subscribe();
        truth.set_service_fee_rate(U256::from(100u64));
        assert_eq!(truth.service_fee_rate(), Some(U256::from(100u64)));
        assert_eq!(
            rx.try_recv().ok(),
            Some(TruthUpdate::ServiceFeeRateChanged {
                rate: U256::from(100u64)
            })
        );
        assert!(!truth.update_offer(Uuid::new_v4(), |_| {}));
        assert!(rx.try_recv().is_err());
    }
}
