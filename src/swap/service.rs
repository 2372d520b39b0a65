use anyhow::{Context as _, Result};
use uuid::Uuid;

use super::validation::{
    validate_swap_for_closing, validate_swap_for_filling,
    validate_swap_for_reporting_payment_received, validate_swap_for_reporting_payment_sent,
};
use super::{Swap, SwapAction, SwapRole, SwapState};
use crate::chain::monitor::{MonitoredTransaction, TransactionKind};
use crate::chain::service_fee;
use crate::coordinator::Collaborators;
use crate::error::EngineError;
use crate::keys::KeyPair;
use crate::offer::service::OfferService;
use crate::offer::validation::{NewSwapData, validate_new_swap_data};
use crate::offer::{ActionState, ActionStatus, Direction, OfferAction};
use crate::p2p::{MakerInformationMessage, TakerInformationMessage};
use crate::store::{self, SwapFlag};

/// Swap lifecycle: taking, the settlement-detail exchange, and the
/// fill/report/close steps driven by user actions and chain events.
#[derive(Clone)]
pub struct SwapService {
    c: Collaborators,
    offers: OfferService,
}

struct StepAction {
    action: SwapAction,
    kind: TransactionKind,
    from: SwapState,
    to: SwapState,
}

const FILL: StepAction = StepAction {
    action: SwapAction::Filling,
    kind: TransactionKind::FillSwap,
    from: SwapState::AwaitingFilling,
    to: SwapState::FillSwapTxBroadcast,
};
const REPORT_SENT: StepAction = StepAction {
    action: SwapAction::ReportingPaymentSent,
    kind: TransactionKind::ReportPaymentSent,
    from: SwapState::AwaitingPaymentSent,
    to: SwapState::ReportPaymentSentTxBroadcast,
};
const REPORT_RECEIVED: StepAction = StepAction {
    action: SwapAction::ReportingPaymentReceived,
    kind: TransactionKind::ReportPaymentReceived,
    from: SwapState::AwaitingPaymentReceived,
    to: SwapState::ReportPaymentReceivedTxBroadcast,
};
const CLOSE: StepAction = StepAction {
    action: SwapAction::Closing,
    kind: TransactionKind::CloseSwap,
    from: SwapState::AwaitingClosing,
    to: SwapState::CloseSwapTxBroadcast,
};

impl SwapService {
    pub fn new(c: Collaborators, offers: OfferService) -> Self {
        Self { c, offers }
    }

    pub fn get_swap(&self, id: Uuid, chain_id: u64) -> Result<Option<Swap>> {
        store::lock(&self.c.store)?.get_swap(id, chain_id)
    }

    fn require_swap(&self, id: Uuid, chain_id: u64) -> Result<Swap> {
        self.get_swap(id, chain_id)?
            .ok_or_else(|| EngineError::unexpected_nil(format!("swap {id} not found in storage")))
    }

    /// Persisted swap an event or message refers to. Errors if the swap is
    /// known on a different chain.
    fn known_swap(&self, id: Uuid, chain_id: u64) -> Result<Option<Swap>> {
        let Some(known) = self.c.truth.swap(id) else {
            tracing::debug!(swap_id = %id, "event for unknown swap, ignoring");
            return Ok(None);
        };
        if known.chain_id != chain_id {
            return Err(EngineError::NonmatchingChainId {
                event: chain_id,
                stored: known.chain_id,
                id,
            }
            .into());
        }
        self.get_swap(id, chain_id)
    }

    fn advance(
        &self,
        id: Uuid,
        chain_id: u64,
        expected: &[SwapState],
        next: SwapState,
    ) -> Result<bool> {
        let advanced = store::lock(&self.c.store)?.advance_swap_state(id, chain_id, expected, next)?;
        if advanced {
            tracing::info!(swap_id = %id, state = %next, "swap state advanced");
            self.c.truth.update_swap(id, |swap| swap.state = next);
        } else {
            tracing::debug!(swap_id = %id, state = %next, "swap not in a predecessor state, skipping");
        }
        Ok(advanced)
    }

    fn set_action(
        &self,
        id: Uuid,
        chain_id: u64,
        action: SwapAction,
        status: ActionStatus,
    ) -> Result<()> {
        store::lock(&self.c.store)?.update_swap_action(id, chain_id, action, &status)?;
        tracing::debug!(swap_id = %id, ?action, state = status.state.as_str(), "swap action state");
        self.c.truth.update_swap(id, |swap| *swap.action_mut(action) = status);
        Ok(())
    }

    fn set_flag(&self, id: Uuid, chain_id: u64, flag: SwapFlag, value: bool) -> Result<()> {
        store::lock(&self.c.store)?.update_swap_flag(id, chain_id, flag, value)?;
        self.c.truth.update_swap(id, |swap| match flag {
            SwapFlag::RequiresFill => swap.requires_fill = value,
            SwapFlag::PaymentSent => swap.is_payment_sent = value,
            SwapFlag::PaymentReceived => swap.is_payment_received = value,
            SwapFlag::BuyerClosed => swap.has_buyer_closed = value,
            SwapFlag::SellerClosed => swap.has_seller_closed = value,
        });
        Ok(())
    }

    /// Same contract as the offer-side `begin_action`: check and mark as
    /// sending under one store lock, nothing written on rejection.
    fn begin_action(
        &self,
        id: Uuid,
        chain_id: u64,
        action: SwapAction,
        validate: fn(&Swap) -> Result<()>,
    ) -> Result<Swap> {
        let sending = ActionStatus::new(ActionState::SendingTransaction);
        let swap = {
            let mut store = store::lock(&self.c.store)?;
            let swap = store.get_swap(id, chain_id)?.ok_or_else(|| {
                EngineError::unexpected_nil(format!("swap {id} not found in storage"))
            })?;
            validate(&swap)?;
            store.update_swap_action(id, chain_id, action, &sending)?;
            swap
        };
        tracing::debug!(swap_id = %id, ?action, "swap action started");
        self.c
            .truth
            .update_swap(id, |swap| *swap.action_mut(action) = sending);
        Ok(swap)
    }

    fn fail_action<T>(
        &self,
        id: Uuid,
        chain_id: u64,
        action: SwapAction,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(err) = &result {
            tracing::warn!(swap_id = %id, ?action, error = %format!("{err:#}"), "swap action failed");
            if let Err(store_err) =
                self.set_action(id, chain_id, action, ActionStatus::failed(err.to_string()))
            {
                tracing::error!(swap_id = %id, error = %store_err, "failed to record swap action failure");
            }
        }
        result
    }

    // Taking

    pub async fn take_offer(
        &self,
        offer_id: Uuid,
        chain_id: u64,
        data: NewSwapData,
        taker_key_pair: KeyPair,
    ) -> Result<Swap> {
        let (offer, chosen) = self
            .offers
            .begin_action(offer_id, chain_id, OfferAction::Taking, |offer| {
                validate_new_swap_data(offer, &data)
            })?;
        let stored_keys = self.c.keys.store_key_pair(&taker_key_pair);
        self.offer_fail(offer_id, chain_id, stored_keys)?;

        let swap = Swap {
            id: offer.id,
            chain_id,
            is_created: true,
            requires_fill: offer.direction == Direction::Sell,
            maker: offer.maker,
            maker_interface_id: offer.interface_id.clone(),
            taker: self.c.chain.user_address(),
            taker_interface_id: taker_key_pair.interface_id().to_vec(),
            stablecoin: offer.stablecoin,
            amount_lower_bound: offer.amount_lower_bound,
            amount_upper_bound: offer.amount_upper_bound,
            security_deposit_amount: offer.security_deposit_amount,
            taken_swap_amount: data.taken_swap_amount,
            service_fee_amount: service_fee(data.taken_swap_amount, offer.service_fee_rate),
            service_fee_rate: offer.service_fee_rate,
            direction: offer.direction,
            settlement_method: chosen,
            maker_private_data: None,
            taker_private_data: data.settlement_method.private_data,
            protocol_version: offer.protocol_version,
            is_payment_sent: false,
            is_payment_received: false,
            has_buyer_closed: false,
            has_seller_closed: false,
            dispute_raiser: Default::default(),
            role: SwapRole::derive(offer.direction, false),
            state: SwapState::Taking,
            filling: ActionStatus::default(),
            reporting_payment_sent: ActionStatus::default(),
            reporting_payment_received: ActionStatus::default(),
            closing: ActionStatus::default(),
        };
        let swap = if store::lock(&self.c.store)?.store_swap(&swap)? {
            self.c.truth.upsert_swap(swap.clone());
            swap
        } else {
            // A previous attempt failed before its transaction went out.
            let existing = self.require_swap(swap.id, chain_id)?;
            if existing.state != SwapState::Taking {
                let err = EngineError::validation(format!("Offer {offer_id} is already being taken."));
                return self.offer_fail(offer_id, chain_id, Err(err));
            }
            existing
        };
        tracing::info!(swap_id = %swap.id, role = swap.role.as_str(), "taking offer");

        let result = self.send_take_offer(&swap).await;
        self.offer_fail(offer_id, chain_id, result)?;
        self.require_swap(swap.id, chain_id)
    }

    fn offer_fail<T>(&self, offer_id: Uuid, chain_id: u64, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            tracing::warn!(offer_id = %offer_id, error = %format!("{err:#}"), "taking offer failed");
            if let Err(store_err) = self.offers.set_action(
                offer_id,
                chain_id,
                OfferAction::Taking,
                ActionStatus::failed(err.to_string()),
            ) {
                tracing::error!(offer_id = %offer_id, error = %store_err, "failed to record taking failure");
            }
        }
        result
    }

    async fn send_take_offer(&self, swap: &Swap) -> Result<()> {
        let (id, chain_id) = (swap.id, swap.chain_id);
        let deposit_and_fee = swap
            .security_deposit_amount
            .saturating_add(swap.service_fee_amount);
        let amount = if swap.role.is_buyer() {
            deposit_and_fee
        } else {
            deposit_and_fee.saturating_add(swap.taken_swap_amount)
        };
        let approve = self
            .c
            .chain
            .approve(swap.stablecoin, self.c.chain.escrow_address(), amount)
            .await
            .context("approve token transfer to take offer")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            approve,
            TransactionKind::ApproveToTake,
            id,
            chain_id,
        ));

        let tx = self
            .c
            .chain
            .take_offer(id, &swap.to_chain()?)
            .await
            .context("send takeOffer transaction")?;
        self.c.monitor.watch(MonitoredTransaction::new(
            tx,
            TransactionKind::TakeOffer,
            id,
            chain_id,
        ));
        tracing::info!(swap_id = %id, tx_hash = %tx, "takeOffer transaction broadcast");

        if self.advance(
            id,
            chain_id,
            &[SwapState::Taking],
            SwapState::TakeOfferTxBroadcast,
        )? {
            self.offers.set_action(
                id,
                chain_id,
                OfferAction::Taking,
                ActionStatus::new(ActionState::AwaitingTransactionConfirmation),
            )?;
        }
        Ok(())
    }

    /// Maker side: the user's offer was taken on chain.
    pub async fn handle_new_swap(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        if self.get_swap(swap_id, chain_id)?.is_some() {
            tracing::debug!(swap_id = %swap_id, "swap already stored");
            return Ok(());
        }
        let raw = self
            .c
            .chain
            .get_swap(swap_id)
            .await
            .with_context(|| format!("get swap {swap_id}"))?
            .ok_or_else(|| {
                EngineError::unexpected_nil(format!("no swap {swap_id} on chain for taken offer"))
            })?;
        if raw.chain_id != chain_id {
            return Err(EngineError::NonmatchingChainId {
                event: chain_id,
                stored: raw.chain_id,
                id: swap_id,
            }
            .into());
        }

        let mut swap = Swap::from_chain(swap_id, &raw, true, SwapState::AwaitingTakerInformation)?;
        if let Some(offer) = self.offers.get_offer(swap_id, chain_id)? {
            swap.maker_private_data = offer
                .settlement_methods
                .iter()
                .find(|m| m.same_public_part(&swap.settlement_method))
                .and_then(|m| m.private_data.clone());
        }
        if store::lock(&self.c.store)?.store_swap(&swap)? {
            tracing::info!(swap_id = %swap_id, role = swap.role.as_str(), "stored new swap");
            self.c.truth.upsert_swap(swap);
        }
        Ok(())
    }

    /// Taker side: the take transaction is confirmed, tell the maker where to
    /// send payment.
    pub async fn send_taker_information_message(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        let swap = self.require_swap(swap_id, chain_id)?;
        if swap.state >= SwapState::AwaitingMakerInformation {
            tracing::debug!(swap_id = %swap_id, state = %swap.state, "taker information already sent");
            return Ok(());
        }
        self.advance(
            swap_id,
            chain_id,
            &[
                SwapState::Taking,
                SwapState::TakeOfferTxBroadcast,
                SwapState::AwaitingTakerInformation,
            ],
            SwapState::AwaitingTakerInformation,
        )?;

        let maker_public_key = self
            .c
            .keys
            .get_public_key(&swap.maker_interface_id)?
            .ok_or_else(|| {
                EngineError::unexpected_nil(format!("maker public key for swap {swap_id} not found"))
            })?;
        let taker_key_pair = self
            .c
            .keys
            .get_key_pair(&swap.taker_interface_id)?
            .ok_or_else(|| {
                EngineError::unexpected_nil(format!("taker key pair for swap {swap_id} not found"))
            })?;
        self.c
            .messenger
            .send_taker_information(
                &maker_public_key,
                &taker_key_pair,
                swap_id,
                swap.taker_private_data.clone(),
            )
            .await
            .with_context(|| format!("send taker information for swap {swap_id}"))?;
        tracing::info!(swap_id = %swap_id, "sent taker information");

        self.advance(
            swap_id,
            chain_id,
            &[SwapState::AwaitingTakerInformation],
            SwapState::AwaitingMakerInformation,
        )?;
        Ok(())
    }

    /// Maker side.
    pub async fn handle_taker_information_message(&self, msg: &TakerInformationMessage) -> Result<()> {
        let Some(known) = self.c.truth.swap(msg.swap_id) else {
            tracing::debug!(swap_id = %msg.swap_id, "taker information for unknown swap");
            return Ok(());
        };
        let Some(swap) = self.get_swap(known.id, known.chain_id)? else {
            return Ok(());
        };
        let (id, chain_id) = (swap.id, swap.chain_id);
        if !swap.role.is_maker()
            || msg.recipient_interface_id != swap.maker_interface_id
            || msg.public_key.interface_id != swap.taker_interface_id
        {
            tracing::warn!(swap_id = %id, "taker information not addressed to this swap's maker, ignoring");
            return Ok(());
        }
        // A maker still in AwaitingMakerInformation has not managed to send
        // its reply yet, so a redelivered message is handled again.
        if !matches!(
            swap.state,
            SwapState::AwaitingTakerInformation | SwapState::AwaitingMakerInformation
        ) {
            tracing::debug!(swap_id = %id, state = %swap.state, "taker information already handled");
            return Ok(());
        }

        self.c.keys.store_public_key(&msg.public_key)?;
        let details = msg.settlement_method_details.clone();
        store::lock(&self.c.store)?.update_swap_taker_private_data(id, chain_id, details.as_deref())?;
        self.c
            .truth
            .update_swap(id, |swap| swap.taker_private_data = details);
        self.advance(
            id,
            chain_id,
            &[SwapState::AwaitingTakerInformation],
            SwapState::AwaitingMakerInformation,
        )?;

        let maker_key_pair = self
            .c
            .keys
            .get_key_pair(&swap.maker_interface_id)?
            .ok_or_else(|| {
                EngineError::unexpected_nil(format!("maker key pair for swap {id} not found"))
            })?;
        self.c
            .messenger
            .send_maker_information(&msg.public_key, &maker_key_pair, id, swap.maker_private_data.clone())
            .await
            .with_context(|| format!("send maker information for swap {id}"))?;
        tracing::info!(swap_id = %id, "sent maker information");

        self.advance(
            id,
            chain_id,
            &[SwapState::AwaitingMakerInformation],
            swap.state_after_information_exchange(),
        )?;
        Ok(())
    }

    /// Taker side.
    pub fn handle_maker_information_message(&self, msg: &MakerInformationMessage) -> Result<()> {
        let Some(known) = self.c.truth.swap(msg.swap_id) else {
            tracing::debug!(swap_id = %msg.swap_id, "maker information for unknown swap");
            return Ok(());
        };
        let Some(swap) = self.get_swap(known.id, known.chain_id)? else {
            return Ok(());
        };
        let (id, chain_id) = (swap.id, swap.chain_id);
        if swap.role.is_maker()
            || msg.sender_interface_id != swap.maker_interface_id
            || msg.recipient_interface_id != swap.taker_interface_id
        {
            tracing::warn!(swap_id = %id, "maker information from unexpected sender or recipient, ignoring");
            return Ok(());
        }
        if swap.state != SwapState::AwaitingMakerInformation {
            tracing::debug!(swap_id = %id, state = %swap.state, "maker information already handled");
            return Ok(());
        }

        let details = msg.settlement_method_details.clone();
        store::lock(&self.c.store)?.update_swap_maker_private_data(id, chain_id, details.as_deref())?;
        self.c
            .truth
            .update_swap(id, |swap| swap.maker_private_data = details);
        self.advance(
            id,
            chain_id,
            &[SwapState::AwaitingMakerInformation],
            swap.state_after_information_exchange(),
        )?;
        Ok(())
    }

    // Fill, report, close

    pub async fn fill_swap(&self, id: Uuid, chain_id: u64) -> Result<()> {
        self.perform(id, chain_id, &FILL, validate_swap_for_filling)
            .await
    }

    pub async fn report_payment_sent(&self, id: Uuid, chain_id: u64) -> Result<()> {
        self.perform(id, chain_id, &REPORT_SENT, validate_swap_for_reporting_payment_sent)
            .await
    }

    pub async fn report_payment_received(&self, id: Uuid, chain_id: u64) -> Result<()> {
        self.perform(
            id,
            chain_id,
            &REPORT_RECEIVED,
            validate_swap_for_reporting_payment_received,
        )
        .await
    }

    pub async fn close_swap(&self, id: Uuid, chain_id: u64) -> Result<()> {
        self.perform(id, chain_id, &CLOSE, validate_swap_for_closing)
            .await
    }

    async fn perform(
        &self,
        id: Uuid,
        chain_id: u64,
        step: &StepAction,
        validate: fn(&Swap) -> Result<()>,
    ) -> Result<()> {
        let swap = self.begin_action(id, chain_id, step.action, validate)?;
        let result = self.send_step(&swap, step).await;
        self.fail_action(id, chain_id, step.action, result)
    }

    async fn send_step(&self, swap: &Swap, step: &StepAction) -> Result<()> {
        let (id, chain_id) = (swap.id, swap.chain_id);
        if step.kind == TransactionKind::FillSwap {
            let approve = self
                .c
                .chain
                .approve(swap.stablecoin, self.c.chain.escrow_address(), swap.taken_swap_amount)
                .await
                .context("approve token transfer to fill swap")?;
            self.c.monitor.watch(MonitoredTransaction::new(
                approve,
                TransactionKind::ApproveToFill,
                id,
                chain_id,
            ));
        }

        let chain = &self.c.chain;
        let tx = match step.kind {
            TransactionKind::FillSwap => chain.fill_swap(id),
            TransactionKind::ReportPaymentSent => chain.report_payment_sent(id),
            TransactionKind::ReportPaymentReceived => chain.report_payment_received(id),
            TransactionKind::CloseSwap => chain.close_swap(id),
            other => {
                return Err(EngineError::InvalidValue(format!("{other:?} is not a swap step")).into());
            }
        }
        .await
        .with_context(|| format!("send {:?} transaction", step.kind))?;
        self.c.monitor.watch(MonitoredTransaction::new(tx, step.kind, id, chain_id));
        tracing::info!(swap_id = %id, tx_hash = %tx, kind = ?step.kind, "swap transaction broadcast");

        if self.advance(id, chain_id, &[step.from], step.to)? {
            if step.kind == TransactionKind::FillSwap {
                self.set_flag(id, chain_id, SwapFlag::RequiresFill, false)?;
            }
            self.set_action(
                id,
                chain_id,
                step.action,
                ActionStatus::new(ActionState::AwaitingTransactionConfirmation),
            )?;
        }
        Ok(())
    }

    // Chain events

    pub fn handle_swap_filled_event(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        let Some(swap) = self.known_swap(swap_id, chain_id)? else {
            return Ok(());
        };
        if self.advance(
            swap_id,
            chain_id,
            &[SwapState::AwaitingFilling, SwapState::FillSwapTxBroadcast],
            SwapState::AwaitingPaymentSent,
        )? {
            self.set_flag(swap_id, chain_id, SwapFlag::RequiresFill, false)?;
            if swap.role == SwapRole::MakerAndSeller {
                self.set_action(
                    swap_id,
                    chain_id,
                    SwapAction::Filling,
                    ActionStatus::new(ActionState::Completed),
                )?;
            }
        }
        Ok(())
    }

    pub fn handle_payment_sent_event(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        let Some(swap) = self.known_swap(swap_id, chain_id)? else {
            return Ok(());
        };
        if self.advance(
            swap_id,
            chain_id,
            &[SwapState::AwaitingPaymentSent, SwapState::ReportPaymentSentTxBroadcast],
            SwapState::AwaitingPaymentReceived,
        )? {
            self.set_flag(swap_id, chain_id, SwapFlag::PaymentSent, true)?;
            if swap.role.is_buyer() {
                self.set_action(
                    swap_id,
                    chain_id,
                    SwapAction::ReportingPaymentSent,
                    ActionStatus::new(ActionState::Completed),
                )?;
            }
        }
        Ok(())
    }

    pub fn handle_payment_received_event(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        let Some(swap) = self.known_swap(swap_id, chain_id)? else {
            return Ok(());
        };
        if self.advance(
            swap_id,
            chain_id,
            &[
                SwapState::AwaitingPaymentReceived,
                SwapState::ReportPaymentReceivedTxBroadcast,
            ],
            SwapState::AwaitingClosing,
        )? {
            self.set_flag(swap_id, chain_id, SwapFlag::PaymentReceived, true)?;
            if !swap.role.is_buyer() {
                self.set_action(
                    swap_id,
                    chain_id,
                    SwapAction::ReportingPaymentReceived,
                    ActionStatus::new(ActionState::Completed),
                )?;
            }
        }
        Ok(())
    }

    pub fn handle_buyer_closed_event(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        self.handle_closed(swap_id, chain_id, true)
    }

    pub fn handle_seller_closed_event(&self, swap_id: Uuid, chain_id: u64) -> Result<()> {
        self.handle_closed(swap_id, chain_id, false)
    }

    fn handle_closed(&self, swap_id: Uuid, chain_id: u64, buyer: bool) -> Result<()> {
        let Some(swap) = self.known_swap(swap_id, chain_id)? else {
            return Ok(());
        };
        let flag = if buyer {
            SwapFlag::BuyerClosed
        } else {
            SwapFlag::SellerClosed
        };
        self.set_flag(swap_id, chain_id, flag, true)?;
        if swap.role.is_buyer() != buyer {
            return Ok(());
        }
        if self.advance(
            swap_id,
            chain_id,
            &[SwapState::AwaitingClosing, SwapState::CloseSwapTxBroadcast],
            SwapState::Closed,
        )? {
            self.set_action(
                swap_id,
                chain_id,
                SwapAction::Closing,
                ActionStatus::new(ActionState::Completed),
            )?;
        }
        Ok(())
    }

    pub fn handle_failed_transaction(
        &self,
        tx: &MonitoredTransaction,
        error: &EngineError,
    ) -> Result<()> {
        let (id, chain_id) = (tx.entity_id, tx.chain_id);
        let step = match tx.kind {
            TransactionKind::ApproveToTake | TransactionKind::TakeOffer => {
                // Back to Taking so `take_offer` can reuse the swap.
                if self.get_swap(id, chain_id)?.is_some() {
                    self.advance(
                        id,
                        chain_id,
                        &[SwapState::TakeOfferTxBroadcast],
                        SwapState::Taking,
                    )?;
                }
                let pending = self
                    .offers
                    .get_offer(id, chain_id)?
                    .is_some_and(|offer| offer.taking.state != ActionState::Completed);
                if pending {
                    self.offers.set_action(
                        id,
                        chain_id,
                        OfferAction::Taking,
                        ActionStatus::failed(error.to_string()),
                    )?;
                }
                return Ok(());
            }
            TransactionKind::ApproveToFill | TransactionKind::FillSwap => &FILL,
            TransactionKind::ReportPaymentSent => &REPORT_SENT,
            TransactionKind::ReportPaymentReceived => &REPORT_RECEIVED,
            TransactionKind::CloseSwap => &CLOSE,
            other => {
                return Err(EngineError::InvalidValue(format!(
                    "{other:?} is not a swap transaction"
                ))
                .into());
            }
        };
        let Some(swap) = self.get_swap(id, chain_id)? else {
            tracing::info!(swap_id = %id, "failed transaction for an unknown swap");
            return Ok(());
        };
        // The step never happened on chain; make it retryable.
        let rolled_back = self.advance(id, chain_id, &[step.to], step.from)?;
        if rolled_back && step.kind == TransactionKind::FillSwap {
            self.set_flag(id, chain_id, SwapFlag::RequiresFill, true)?;
        }
        if !rolled_back
            && (swap.state > step.to || swap.action(step.action).state == ActionState::Completed)
        {
            tracing::debug!(swap_id = %id, state = %swap.state, kind = ?tx.kind, "swap moved past the failed transaction");
            return Ok(());
        }
        self.set_action(id, chain_id, step.action, ActionStatus::failed(error.to_string()))
    }
}
