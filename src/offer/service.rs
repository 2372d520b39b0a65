use alloy_primitives::U256;
use anyhow::{Context as _, Result};
use uuid::Uuid;

use super::validation::{
    NewOfferData, validate_edited_settlement_methods, validate_new_offer_data,
    validate_offer_for_cancellation, validate_offer_for_editing, validate_offer_for_opening,
};
use super::{ActionState, ActionStatus, Offer, OfferAction, OfferState, SettlementMethod};
use crate::chain::monitor::{MonitoredTransaction, TransactionKind};
use crate::chain::service_fee;
use crate::coordinator::Collaborators;
use crate::error::EngineError;
use crate::keys::KeyPair;
use crate::p2p::PublicKeyAnnouncement;
use crate::store;

const BEFORE_OPENED: [OfferState; 3] = [
    OfferState::Opening,
    OfferState::OpenOfferTxBroadcast,
    OfferState::AwaitingPublicKeyAnnouncement,
];

/// Offer lifecycle: chain events, public-key announcements and the maker's
/// open/edit/cancel actions.
#[derive(Clone)]
pub struct OfferService {
    c: Collaborators,
}

impl OfferService {
    pub fn new(c: Collaborators) -> Self {
        Self { c }
    }

    pub fn get_offer(&self, id: Uuid, chain_id: u64) -> Result<Option<Offer>> {
        store::lock(&self.c.store)?.get_offer(id, chain_id)
    }

    fn require_offer(&self, id: Uuid, chain_id: u64) -> Result<Offer> {
        self.get_offer(id, chain_id)?
            .ok_or_else(|| EngineError::unexpected_nil(format!("offer {id} not found in storage")))
    }

    pub(crate) fn set_action(
        &self,
        id: Uuid,
        chain_id: u64,
        action: OfferAction,
        status: ActionStatus,
    ) -> Result<()> {
        store::lock(&self.c.store)?.update_offer_action(id, chain_id, action, &status)?;
        tracing::debug!(offer_id = %id, ?action, state = status.state.as_str(), "offer action state");
        self.c.truth.update_offer(id, |offer| *offer.action_mut(action) = status);
        Ok(())
    }

    /// Storage first, then memory. Returns `false` if the offer was not in
    /// one of `expected`, which callers treat as already handled.
    fn advance(
        &self,
        id: Uuid,
        chain_id: u64,
        expected: &[OfferState],
        next: OfferState,
    ) -> Result<bool> {
        let advanced =
            store::lock(&self.c.store)?.advance_offer_state(id, chain_id, expected, next)?;
        if advanced {
            tracing::info!(offer_id = %id, state = %next, "offer state advanced");
            self.c.truth.update_offer(id, |offer| offer.state = next);
        } else {
            tracing::debug!(offer_id = %id, state = %next, "offer not in a predecessor state, skipping");
        }
        Ok(advanced)
    }

    /// Starts a new attempt of `action`. The offer is read, checked and marked
    /// as sending under one store lock; a rejected attempt writes nothing, so
    /// an attempt already in flight keeps its status.
    pub(crate) fn begin_action<T>(
        &self,
        id: Uuid,
        chain_id: u64,
        action: OfferAction,
        validate: impl FnOnce(&Offer) -> Result<T>,
    ) -> Result<(Offer, T)> {
        let sending = ActionStatus::new(ActionState::SendingTransaction);
        let (offer, checked) = {
            let mut store = store::lock(&self.c.store)?;
            let offer = store.get_offer(id, chain_id)?.ok_or_else(|| {
                EngineError::unexpected_nil(format!("offer {id} not found in storage"))
            })?;
            let checked = validate(&offer)?;
            store.update_offer_action(id, chain_id, action, &sending)?;
            (offer, checked)
        };
        tracing::debug!(offer_id = %id, ?action, "offer action started");
        self.c
            .truth
            .update_offer(id, |offer| *offer.action_mut(action) = sending);
        Ok((offer, checked))
    }

    fn fail_action<T>(
        &self,
        id: Uuid,
        chain_id: u64,
        action: OfferAction,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(err) = &result {
            tracing::warn!(offer_id = %id, ?action, error = %format!("{err:#}"), "offer action failed");
            if let Err(store_err) =
                self.set_action(id, chain_id, action, ActionStatus::failed(err.to_string()))
            {
                tracing::error!(offer_id = %id, error = %store_err, "failed to record offer action failure");
            }
        }
        result
    }

    // Chain events

    pub async fn handle_offer_opened_event(
        &self,
        offer_id: Uuid,
        interface_id: &[u8],
        chain_id: u64,
    ) -> Result<()> {
        let Some(raw) = self
            .c
            .chain
            .get_offer(offer_id)
            .await
            .with_context(|| format!("get offer {offer_id}"))?
        else {
            tracing::info!(offer_id = %offer_id, "no offer on chain for OfferOpened event, ignoring");
            return Ok(());
        };
        if raw.chain_id != chain_id {
            return Err(EngineError::NonmatchingChainId {
                event: chain_id,
                stored: raw.chain_id,
                id: offer_id,
            }
            .into());
        }

        if let Some(stored) = self.get_offer(offer_id, chain_id)? {
            if !stored.is_user_maker || !BEFORE_OPENED.contains(&stored.state) {
                tracing::debug!(offer_id = %offer_id, state = %stored.state, "offer already known");
                return Ok(());
            }
            let key_pair = self
                .c
                .keys
                .get_key_pair(&stored.interface_id)?
                .ok_or_else(|| {
                    EngineError::unexpected_nil(format!(
                        "key pair for offer {offer_id} not found"
                    ))
                })?;
            self.c
                .messenger
                .announce_public_key(offer_id, &key_pair)
                .await
                .with_context(|| format!("announce public key for offer {offer_id}"))?;
            if self.advance(offer_id, chain_id, &BEFORE_OPENED, OfferState::OfferOpened)? {
                self.set_action(
                    offer_id,
                    chain_id,
                    OfferAction::Opening,
                    ActionStatus::new(ActionState::Completed),
                )?;
            }
            return Ok(());
        }

        let have_public_key = self.c.keys.get_public_key(&raw.interface_id)?.is_some();
        let state = if have_public_key {
            OfferState::OfferOpened
        } else {
            OfferState::AwaitingPublicKeyAnnouncement
        };
        if raw.interface_id != interface_id {
            tracing::warn!(offer_id = %offer_id, "OfferOpened interface id differs from on-chain offer");
        }
        let offer = Offer::from_chain(offer_id, &raw, false, have_public_key, state)?;
        let inserted = store::lock(&self.c.store)?.store_offer(&offer)?;
        if inserted {
            tracing::info!(offer_id = %offer_id, state = %state, "stored new offer");
            self.c.truth.upsert_offer(offer);
        }
        Ok(())
    }

    pub async fn handle_offer_edited_event(&self, offer_id: Uuid, chain_id: u64) -> Result<()> {
        let Some(raw) = self
            .c
            .chain
            .get_offer(offer_id)
            .await
            .with_context(|| format!("get offer {offer_id}"))?
        else {
            tracing::info!(offer_id = %offer_id, "no offer on chain for OfferEdited event, ignoring");
            return Ok(());
        };
        let Some(stored) = self.get_offer(offer_id, chain_id)? else {
            tracing::info!(offer_id = %offer_id, "edited offer is not stored, ignoring");
            return Ok(());
        };
        if raw.chain_id != stored.chain_id {
            return Err(EngineError::NonmatchingChainId {
                event: raw.chain_id,
                stored: stored.chain_id,
                id: offer_id,
            }
            .into());
        }

        let mut edited = Offer::from_chain(
            offer_id,
            &raw,
            stored.is_user_maker,
            stored.have_public_key,
            stored.state,
        )?;
        if stored.is_user_maker {
            let pending = store::lock(&self.c.store)?
                .get_pending_settlement_methods(offer_id, chain_id)?;
            edited.attach_private_data(&stored.settlement_methods);
            edited.attach_private_data(&pending);
        }
        {
            let mut store = store::lock(&self.c.store)?;
            store.replace_settlement_methods(offer_id, chain_id, &edited.settlement_methods)?;
            store.replace_pending_settlement_methods(offer_id, chain_id, &[])?;
        }
        let methods = edited.settlement_methods;
        tracing::info!(offer_id = %offer_id, methods = methods.len(), "offer settlement methods updated");
        self.c
            .truth
            .update_offer(offer_id, |offer| offer.settlement_methods = methods);
        if stored.is_user_maker && stored.editing.state != ActionState::None {
            self.set_action(
                offer_id,
                chain_id,
                OfferAction::Editing,
                ActionStatus::new(ActionState::Completed),
            )?;
        }
        Ok(())
    }

    pub fn handle_offer_canceled_event(&self, offer_id: Uuid, chain_id: u64) -> Result<()> {
        self.remove_offer(offer_id, chain_id)?;
        tracing::info!(offer_id = %offer_id, "offer canceled");
        Ok(())
    }

    /// Removes the offer only; the swap side of `OfferTaken` is handled by
    /// the swap service.
    pub fn handle_offer_taken_event(&self, offer_id: Uuid, chain_id: u64) -> Result<()> {
        self.remove_offer(offer_id, chain_id)?;
        tracing::info!(offer_id = %offer_id, "offer taken");
        Ok(())
    }

    fn remove_offer(&self, offer_id: Uuid, chain_id: u64) -> Result<()> {
        store::lock(&self.c.store)?.delete_offer(offer_id, chain_id)?;
        self.c.truth.remove_offer(offer_id, chain_id);
        Ok(())
    }

    pub fn handle_service_fee_rate_changed_event(&self, rate: U256) {
        tracing::info!(%rate, "service fee rate changed");
        self.c.truth.set_service_fee_rate(rate);
    }

    // Peer messages

    pub fn handle_public_key_announcement(&self, msg: &PublicKeyAnnouncement) -> Result<()> {
        if self.c.keys.store_public_key(&msg.public_key)? {
            tracing::debug!(interface_id = %hex::encode(&msg.public_key.interface_id), "stored announced public key");
        }

        let Some(known) = self.c.truth.offer(msg.offer_id) else {
            tracing::debug!(offer_id = %msg.offer_id, "public key announced for unknown offer");
            return Ok(());
        };
        let Some(offer) = self.get_offer(known.id, known.chain_id)? else {
            return Ok(());
        };
        if offer.is_user_maker || offer.have_public_key || offer.state >= OfferState::OfferOpened {
            return Ok(());
        }
        if offer.interface_id != msg.public_key.interface_id {
            tracing::warn!(offer_id = %offer.id, "announced key does not match offer interface id, ignoring");
            return Ok(());
        }

        store::lock(&self.c.store)?.update_offer_have_public_key(offer.id, offer.chain_id, true)?;
        self.c
            .truth
            .update_offer(offer.id, |offer| offer.have_public_key = true);
        self.advance(
            offer.id,
            offer.chain_id,
            &[OfferState::AwaitingPublicKeyAnnouncement],
            OfferState::OfferOpened,
        )?;
        Ok(())
    }

    // User actions

    pub async fn open_offer(&self, data: NewOfferData, maker_key_pair: KeyPair) -> Result<Offer> {
        let rate = self
            .c
            .chain
            .get_service_fee_rate()
            .await
            .context("get service fee rate")?;
        let validated = validate_new_offer_data(data, rate)?;
        let chain_id = self.c.chain.chain_id().await.context("get chain id")?;
        self.c.keys.store_key_pair(&maker_key_pair)?;

        let data = validated.data;
        let offer = Offer {
            id: Uuid::new_v4(),
            chain_id,
            is_created: true,
            is_taken: false,
            maker: self.c.chain.user_address(),
            interface_id: maker_key_pair.interface_id().to_vec(),
            stablecoin: data.stablecoin,
            amount_lower_bound: data.amount_lower_bound,
            amount_upper_bound: data.amount_upper_bound,
            security_deposit_amount: data.security_deposit_amount,
            service_fee_rate: rate,
            direction: data.direction,
            settlement_methods: data.settlement_methods,
            protocol_version: U256::ZERO,
            is_user_maker: true,
            have_public_key: true,
            state: OfferState::Opening,
            opening: ActionStatus::new(ActionState::Validating),
            canceling: ActionStatus::default(),
            editing: ActionStatus::default(),
            taking: ActionStatus::default(),
        };
        store::lock(&self.c.store)?.store_offer(&offer)?;
        self.c.truth.upsert_offer(offer.clone());
        tracing::info!(offer_id = %offer.id, "opening offer");

        self.reopen_offer(offer.id, chain_id).await
    }

    /// Sends `openOffer` for a stored offer that has not reached the chain,
    /// either a new one or one whose earlier open transaction failed.
    pub async fn reopen_offer(&self, id: Uuid, chain_id: u64) -> Result<Offer> {
        let (offer, ()) =
            self.begin_action(id, chain_id, OfferAction::Opening, validate_offer_for_opening)?;
        let fee_upper_bound = service_fee(offer.amount_upper_bound, offer.service_fee_rate);
        let result = self.send_open_offer(&offer, fee_upper_bound).await;
        self.fail_action(id, chain_id, OfferAction::Opening, result)?;
        self.require_offer(id, chain_id)
    }

    async fn send_open_offer(&self, offer: &Offer, service_fee_upper_bound: U256) -> Result<()> {
        let (id, chain_id) = (offer.id, offer.chain_id);
        let amount = offer
            .security_deposit_amount
            .saturating_add(service_fee_upper_bound);
        let approve = self
            .c
            .chain
            .approve(offer.stablecoin, self.c.chain.escrow_address(), amount)
            .await
            .context("approve token transfer to open offer")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            approve,
            TransactionKind::ApproveToOpen,
            id,
            chain_id,
        ));

        let tx = self
            .c
            .chain
            .open_offer(id, &offer.to_chain()?)
            .await
            .context("send openOffer transaction")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            tx,
            TransactionKind::OpenOffer,
            id,
            chain_id,
        ));
        tracing::info!(offer_id = %id, tx_hash = %tx, "openOffer transaction broadcast");

        if self.advance(
            id,
            chain_id,
            &[OfferState::Opening],
            OfferState::OpenOfferTxBroadcast,
        )? {
            self.set_action(
                id,
                chain_id,
                OfferAction::Opening,
                ActionStatus::new(ActionState::AwaitingTransactionConfirmation),
            )?;
        }
        Ok(())
    }

    pub async fn cancel_offer(&self, id: Uuid, chain_id: u64) -> Result<()> {
        self.begin_action(id, chain_id, OfferAction::Canceling, validate_offer_for_cancellation)?;
        let result = self.send_cancel_offer(id, chain_id).await;
        if result.is_err() {
            // Nothing reached the chain; the offer is still open.
            self.advance(id, chain_id, &[OfferState::Canceling], OfferState::OfferOpened)?;
        }
        self.fail_action(id, chain_id, OfferAction::Canceling, result)
    }

    async fn send_cancel_offer(&self, id: Uuid, chain_id: u64) -> Result<()> {
        if !self.advance(id, chain_id, &[OfferState::OfferOpened], OfferState::Canceling)? {
            return Err(EngineError::validation(format!(
                "Offer {id} changed while it was being canceled."
            )));
        }
        let tx = self
            .c
            .chain
            .cancel_offer(id)
            .await
            .context("send cancelOffer transaction")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            tx,
            TransactionKind::CancelOffer,
            id,
            chain_id,
        ));
        tracing::info!(offer_id = %id, tx_hash = %tx, "cancelOffer transaction broadcast");
        self.advance(
            id,
            chain_id,
            &[OfferState::Canceling],
            OfferState::CancelOfferTxBroadcast,
        )?;
        self.set_action(
            id,
            chain_id,
            OfferAction::Canceling,
            ActionStatus::new(ActionState::AwaitingTransactionConfirmation),
        )
    }

    /// Replaces the offer's settlement methods on chain. The offer's state is
    /// not touched; the `OfferEdited` event applies the new methods locally.
    pub async fn edit_offer(
        &self,
        id: Uuid,
        chain_id: u64,
        methods: Vec<SettlementMethod>,
    ) -> Result<()> {
        let (offer, ()) = self.begin_action(id, chain_id, OfferAction::Editing, |offer| {
            validate_offer_for_editing(offer)?;
            validate_edited_settlement_methods(&methods)
        })?;
        let result = self.send_edit_offer(offer, methods).await;
        self.fail_action(id, chain_id, OfferAction::Editing, result)
    }

    async fn send_edit_offer(&self, offer: Offer, methods: Vec<SettlementMethod>) -> Result<()> {
        let (id, chain_id) = (offer.id, offer.chain_id);
        store::lock(&self.c.store)?.replace_pending_settlement_methods(id, chain_id, &methods)?;
        let edited = Offer {
            settlement_methods: methods,
            ..offer
        };
        let tx = self
            .c
            .chain
            .edit_offer(id, &edited.to_chain()?)
            .await
            .context("send editOffer transaction")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            tx,
            TransactionKind::EditOffer,
            id,
            chain_id,
        ));
        tracing::info!(offer_id = %id, tx_hash = %tx, "editOffer transaction broadcast");
        self.set_action(
            id,
            chain_id,
            OfferAction::Editing,
            ActionStatus::new(ActionState::AwaitingTransactionConfirmation),
        )
    }

    pub fn handle_failed_transaction(
        &self,
        tx: &MonitoredTransaction,
        error: &EngineError,
    ) -> Result<()> {
        let (id, chain_id) = (tx.entity_id, tx.chain_id);
        let Some(offer) = self.get_offer(id, chain_id)? else {
            tracing::info!(offer_id = %id, "failed transaction for an offer no longer stored");
            return Ok(());
        };
        let action = match tx.kind {
            TransactionKind::ApproveToOpen | TransactionKind::OpenOffer => {
                if offer.state > OfferState::OpenOfferTxBroadcast {
                    tracing::debug!(offer_id = %id, state = %offer.state, "offer already opened");
                    return Ok(());
                }
                // Back to Opening so `reopen_offer` can retry.
                self.advance(
                    id,
                    chain_id,
                    &[OfferState::OpenOfferTxBroadcast],
                    OfferState::Opening,
                )?;
                OfferAction::Opening
            }
            TransactionKind::CancelOffer => {
                self.advance(
                    id,
                    chain_id,
                    &[OfferState::Canceling, OfferState::CancelOfferTxBroadcast],
                    OfferState::OfferOpened,
                )?;
                OfferAction::Canceling
            }
            TransactionKind::EditOffer => {
                store::lock(&self.c.store)?.replace_pending_settlement_methods(id, chain_id, &[])?;
                OfferAction::Editing
            }
            other => {
                return Err(EngineError::InvalidValue(format!(
                    "{other:?} is not an offer transaction"
                ))
                .into());
            }
        };
        if offer.action(action).state == ActionState::Completed {
            return Ok(());
        }
        self.set_action(id, chain_id, action, ActionStatus::failed(error.to_string()))
    }
}
