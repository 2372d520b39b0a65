use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::chain::ChainReader;
use crate::chain::events::{ChainEvent, EventRecord};
use crate::chain::listener::{ErrorNotifier, EventDispatcher, EventListener, ListenerHandle};
use crate::chain::monitor::{MonitoredTransaction, TransactionMonitor};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::keys::KeyStore;
use crate::offer::service::OfferService;
use crate::p2p::{PeerMessage, PeerMessenger};
use crate::store::{self, SharedStore};
use crate::swap::service::SwapService;
use crate::truth::{TruthSource, TruthUpdate};

/// Everything the offer and swap services talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainReader>,
    pub keys: Arc<dyn KeyStore>,
    pub messenger: Arc<dyn PeerMessenger>,
    pub store: SharedStore,
    pub truth: Arc<TruthSource>,
    pub monitor: TransactionMonitor,
}

/// Routes chain events, failed transactions and peer messages to the offer
/// and swap services, and owns the block cursor.
#[derive(Clone)]
pub struct Coordinator {
    cfg: EngineConfig,
    c: Collaborators,
    offers: OfferService,
    swaps: SwapService,
}

impl Coordinator {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        keys: Arc<dyn KeyStore>,
        messenger: Arc<dyn PeerMessenger>,
        store: SharedStore,
        cfg: EngineConfig,
    ) -> Self {
        let c = Collaborators {
            chain,
            keys,
            messenger,
            store,
            truth: Arc::new(TruthSource::new(cfg.update_channel_capacity)),
            monitor: TransactionMonitor::default(),
        };
        let offers = OfferService::new(c.clone());
        let swaps = SwapService::new(c.clone(), offers.clone());
        Self {
            cfg,
            c,
            offers,
            swaps,
        }
    }

    pub fn offers(&self) -> &OfferService {
        &self.offers
    }

    pub fn swaps(&self) -> &SwapService {
        &self.swaps
    }

    pub fn truth(&self) -> &TruthSource {
        &self.c.truth
    }

    pub fn monitor(&self) -> &TransactionMonitor {
        &self.c.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TruthUpdate> {
        self.c.truth.subscribe()
    }

    /// Loads persisted offers and swaps into the truth source. Call once
    /// before starting the listener.
    pub fn restore(&self) -> Result<()> {
        let (offers, swaps) = {
            let store = store::lock(&self.c.store)?;
            (store.list_offers()?, store.list_swaps()?)
        };
        tracing::info!(offers = offers.len(), swaps = swaps.len(), "restored state from storage");
        for offer in offers {
            self.c.truth.upsert_offer(offer);
        }
        for swap in swaps {
            self.c.truth.upsert_swap(swap);
        }
        Ok(())
    }

    /// Starts polling from the persisted cursor, or from `start_block` on a
    /// fresh store.
    pub async fn start_listener(&self, notifier: Arc<dyn ErrorNotifier>) -> Result<ListenerHandle> {
        let chain_id = self
            .c
            .chain
            .chain_id()
            .await
            .context("get chain id for block cursor")?;
        let cursor = store::lock(&self.c.store)?.last_parsed_block(chain_id)?;
        let last_parsed = cursor.unwrap_or(self.cfg.start_block);
        tracing::info!(chain_id, last_parsed, "starting event listener");
        let listener = EventListener::new(
            self.c.chain.clone(),
            Arc::new(self.clone()),
            notifier,
            self.c.monitor.clone(),
            &self.cfg,
            last_parsed,
        );
        Ok(listener.start())
    }

    pub async fn handle_peer_message(&self, msg: PeerMessage) -> Result<()> {
        match msg {
            PeerMessage::PublicKeyAnnouncement(msg) => {
                self.offers.handle_public_key_announcement(&msg)
            }
            PeerMessage::TakerInformation(msg) => {
                self.swaps.handle_taker_information_message(&msg).await
            }
            PeerMessage::MakerInformation(msg) => {
                self.swaps.handle_maker_information_message(&msg)
            }
        }
    }

    async fn handle_event(&self, record: &EventRecord) -> Result<()> {
        let chain_id = record.chain_id;
        match &record.event {
            ChainEvent::OfferOpened {
                offer_id,
                interface_id,
            } => {
                self.offers
                    .handle_offer_opened_event(*offer_id, interface_id, chain_id)
                    .await
            }
            ChainEvent::OfferEdited { offer_id } => {
                self.offers
                    .handle_offer_edited_event(*offer_id, chain_id)
                    .await
            }
            ChainEvent::OfferCanceled { offer_id } => {
                self.offers.handle_offer_canceled_event(*offer_id, chain_id)
            }
            ChainEvent::OfferTaken { offer_id, .. } => {
                self.handle_offer_taken(*offer_id, chain_id).await
            }
            ChainEvent::ServiceFeeRateChanged {
                new_service_fee_rate,
            } => {
                self.offers
                    .handle_service_fee_rate_changed_event(*new_service_fee_rate);
                Ok(())
            }
            ChainEvent::SwapFilled { swap_id } => {
                self.swaps.handle_swap_filled_event(*swap_id, chain_id)
            }
            ChainEvent::PaymentSent { swap_id } => {
                self.swaps.handle_payment_sent_event(*swap_id, chain_id)
            }
            ChainEvent::PaymentReceived { swap_id } => {
                self.swaps.handle_payment_received_event(*swap_id, chain_id)
            }
            ChainEvent::BuyerClosed { swap_id } => {
                self.swaps.handle_buyer_closed_event(*swap_id, chain_id)
            }
            ChainEvent::SellerClosed { swap_id } => {
                self.swaps.handle_seller_closed_event(*swap_id, chain_id)
            }
        }
    }

    /// The swap side runs before the offer is dropped: a maker's new swap
    /// copies private data from the offer's settlement methods.
    async fn handle_offer_taken(&self, offer_id: Uuid, chain_id: u64) -> Result<()> {
        let offer = self.offers.get_offer(offer_id, chain_id)?;
        if offer.as_ref().is_some_and(|offer| offer.is_user_maker) {
            self.swaps.handle_new_swap(offer_id, chain_id).await?;
        } else {
            let local = self.swaps.get_swap(offer_id, chain_id)?;
            if let Some(swap) = local
                && !swap.role.is_maker()
            {
                self.swaps
                    .send_taker_information_message(offer_id, chain_id)
                    .await?;
            }
        }
        self.offers.handle_offer_taken_event(offer_id, chain_id)
    }
}

#[async_trait::async_trait]
impl EventDispatcher for Coordinator {
    async fn dispatch_block(
        &self,
        chain_id: u64,
        block_number: u64,
        events: Vec<EventRecord>,
    ) -> Result<()> {
        for record in &events {
            tracing::debug!(
                block = block_number,
                event = record.event.name(),
                tx_hash = %record.transaction_hash,
                "handling event"
            );
            if record.chain_id != chain_id {
                return Err(EngineError::NonmatchingChainId {
                    event: record.chain_id,
                    stored: chain_id,
                    id: record.event.entity_id().unwrap_or_default(),
                }
                .into());
            }
            self.handle_event(record).await.with_context(|| {
                format!(
                    "handle {} in block {block_number}",
                    record.event.name()
                )
            })?;
        }
        store::lock(&self.c.store)?.set_last_parsed_block(chain_id, block_number)
    }

    async fn handle_failed_transaction(
        &self,
        tx: MonitoredTransaction,
        error: EngineError,
    ) -> Result<()> {
        if tx.kind.is_offer_action() {
            self.offers.handle_failed_transaction(&tx, &error)
        } else {
            self.swaps.handle_failed_transaction(&tx, &error)
        }
    }
}
