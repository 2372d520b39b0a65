pub mod service;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::SwapStruct;
use crate::error::EngineError;
use crate::offer::{ActionStatus, Direction, SettlementMethod};

/// Swap states in their only permitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Taking,
    TakeOfferTxBroadcast,
    AwaitingTakerInformation,
    AwaitingMakerInformation,
    AwaitingFilling,
    FillSwapTxBroadcast,
    AwaitingPaymentSent,
    ReportPaymentSentTxBroadcast,
    AwaitingPaymentReceived,
    ReportPaymentReceivedTxBroadcast,
    AwaitingClosing,
    CloseSwapTxBroadcast,
    Closed,
}

impl SwapState {
    pub const ALL: [SwapState; 13] = [
        SwapState::Taking,
        SwapState::TakeOfferTxBroadcast,
        SwapState::AwaitingTakerInformation,
        SwapState::AwaitingMakerInformation,
        SwapState::AwaitingFilling,
        SwapState::FillSwapTxBroadcast,
        SwapState::AwaitingPaymentSent,
        SwapState::ReportPaymentSentTxBroadcast,
        SwapState::AwaitingPaymentReceived,
        SwapState::ReportPaymentReceivedTxBroadcast,
        SwapState::AwaitingClosing,
        SwapState::CloseSwapTxBroadcast,
        SwapState::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SwapState::Taking => "taking",
            SwapState::TakeOfferTxBroadcast => "take_offer_tx_broadcast",
            SwapState::AwaitingTakerInformation => "awaiting_taker_information",
            SwapState::AwaitingMakerInformation => "awaiting_maker_information",
            SwapState::AwaitingFilling => "awaiting_filling",
            SwapState::FillSwapTxBroadcast => "fill_swap_tx_broadcast",
            SwapState::AwaitingPaymentSent => "awaiting_payment_sent",
            SwapState::ReportPaymentSentTxBroadcast => "report_payment_sent_tx_broadcast",
            SwapState::AwaitingPaymentReceived => "awaiting_payment_received",
            SwapState::ReportPaymentReceivedTxBroadcast => "report_payment_received_tx_broadcast",
            SwapState::AwaitingClosing => "awaiting_closing",
            SwapState::CloseSwapTxBroadcast => "close_swap_tx_broadcast",
            SwapState::Closed => "closed",
        }
    }
}

impl FromStr for SwapState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EngineError::InvalidValue(format!("unknown swap state: {s}")))
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRole {
    MakerAndBuyer,
    MakerAndSeller,
    TakerAndBuyer,
    TakerAndSeller,
}

impl SwapRole {
    pub const ALL: [SwapRole; 4] = [
        SwapRole::MakerAndBuyer,
        SwapRole::MakerAndSeller,
        SwapRole::TakerAndBuyer,
        SwapRole::TakerAndSeller,
    ];

    /// `direction` is the direction of the offer, i.e. from the maker's side.
    pub fn derive(direction: Direction, is_user_maker: bool) -> Self {
        match (direction, is_user_maker) {
            (Direction::Buy, true) => SwapRole::MakerAndBuyer,
            (Direction::Sell, true) => SwapRole::MakerAndSeller,
            (Direction::Sell, false) => SwapRole::TakerAndBuyer,
            (Direction::Buy, false) => SwapRole::TakerAndSeller,
        }
    }

    pub fn is_maker(self) -> bool {
        matches!(self, SwapRole::MakerAndBuyer | SwapRole::MakerAndSeller)
    }

    pub fn is_buyer(self) -> bool {
        matches!(self, SwapRole::MakerAndBuyer | SwapRole::TakerAndBuyer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapRole::MakerAndBuyer => "maker_and_buyer",
            SwapRole::MakerAndSeller => "maker_and_seller",
            SwapRole::TakerAndBuyer => "taker_and_buyer",
            SwapRole::TakerAndSeller => "taker_and_seller",
        }
    }
}

impl FromStr for SwapRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| EngineError::InvalidValue(format!("unknown swap role: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    Filling,
    ReportingPaymentSent,
    ReportingPaymentReceived,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub id: Uuid,
    pub chain_id: u64,
    pub is_created: bool,
    pub requires_fill: bool,
    pub maker: Address,
    pub maker_interface_id: Vec<u8>,
    pub taker: Address,
    pub taker_interface_id: Vec<u8>,
    pub stablecoin: Address,
    pub amount_lower_bound: U256,
    pub amount_upper_bound: U256,
    pub security_deposit_amount: U256,
    pub taken_swap_amount: U256,
    pub service_fee_amount: U256,
    pub service_fee_rate: U256,
    pub direction: Direction,
    pub settlement_method: SettlementMethod,
    pub maker_private_data: Option<String>,
    pub taker_private_data: Option<String>,
    pub protocol_version: U256,
    pub is_payment_sent: bool,
    pub is_payment_received: bool,
    pub has_buyer_closed: bool,
    pub has_seller_closed: bool,
    pub dispute_raiser: U256,
    pub role: SwapRole,
    pub state: SwapState,
    pub filling: ActionStatus,
    pub reporting_payment_sent: ActionStatus,
    pub reporting_payment_received: ActionStatus,
    pub closing: ActionStatus,
}

impl Swap {
    pub fn from_chain(
        id: Uuid,
        raw: &SwapStruct,
        is_user_maker: bool,
        state: SwapState,
    ) -> Result<Self> {
        let direction = Direction::from_chain(raw.direction)
            .with_context(|| format!("decode direction of swap {id}"))?;
        let settlement_method = SettlementMethod::from_on_chain(&raw.settlement_method)
            .with_context(|| format!("decode settlement method of swap {id}"))?;
        Ok(Self {
            id,
            chain_id: raw.chain_id,
            is_created: raw.is_created,
            requires_fill: raw.requires_fill,
            maker: raw.maker,
            maker_interface_id: raw.maker_interface_id.clone(),
            taker: raw.taker,
            taker_interface_id: raw.taker_interface_id.clone(),
            stablecoin: raw.stablecoin,
            amount_lower_bound: raw.amount_lower_bound,
            amount_upper_bound: raw.amount_upper_bound,
            security_deposit_amount: raw.security_deposit_amount,
            taken_swap_amount: raw.taken_swap_amount,
            service_fee_amount: raw.service_fee_amount,
            service_fee_rate: raw.service_fee_rate,
            direction,
            settlement_method,
            maker_private_data: None,
            taker_private_data: None,
            protocol_version: raw.protocol_version,
            is_payment_sent: raw.is_payment_sent,
            is_payment_received: raw.is_payment_received,
            has_buyer_closed: raw.has_buyer_closed,
            has_seller_closed: raw.has_seller_closed,
            dispute_raiser: raw.dispute_raiser,
            role: SwapRole::derive(direction, is_user_maker),
            state,
            filling: ActionStatus::default(),
            reporting_payment_sent: ActionStatus::default(),
            reporting_payment_received: ActionStatus::default(),
            closing: ActionStatus::default(),
        })
    }

    pub fn to_chain(&self) -> Result<SwapStruct> {
        Ok(SwapStruct {
            is_created: self.is_created,
            requires_fill: self.requires_fill,
            maker: self.maker,
            maker_interface_id: self.maker_interface_id.clone(),
            taker: self.taker,
            taker_interface_id: self.taker_interface_id.clone(),
            stablecoin: self.stablecoin,
            amount_lower_bound: self.amount_lower_bound,
            amount_upper_bound: self.amount_upper_bound,
            security_deposit_amount: self.security_deposit_amount,
            taken_swap_amount: self.taken_swap_amount,
            service_fee_amount: self.service_fee_amount,
            service_fee_rate: self.service_fee_rate,
            direction: self.direction.to_chain(),
            settlement_method: self.settlement_method.to_on_chain()?,
            protocol_version: self.protocol_version,
            is_payment_sent: self.is_payment_sent,
            is_payment_received: self.is_payment_received,
            has_buyer_closed: self.has_buyer_closed,
            has_seller_closed: self.has_seller_closed,
            dispute_raiser: self.dispute_raiser,
            chain_id: self.chain_id,
        })
    }

    pub fn action(&self, action: SwapAction) -> &ActionStatus {
        match action {
            SwapAction::Filling => &self.filling,
            SwapAction::ReportingPaymentSent => &self.reporting_payment_sent,
            SwapAction::ReportingPaymentReceived => &self.reporting_payment_received,
            SwapAction::Closing => &self.closing,
        }
    }

    pub fn action_mut(&mut self, action: SwapAction) -> &mut ActionStatus {
        match action {
            SwapAction::Filling => &mut self.filling,
            SwapAction::ReportingPaymentSent => &mut self.reporting_payment_sent,
            SwapAction::ReportingPaymentReceived => &mut self.reporting_payment_received,
            SwapAction::Closing => &mut self.closing,
        }
    }

    /// State the swap moves to once both sides exchanged settlement details.
    pub fn state_after_information_exchange(&self) -> SwapState {
        match self.direction {
            Direction::Buy => SwapState::AwaitingPaymentSent,
            Direction::Sell => SwapState::AwaitingFilling,
        }
    }

    /// The interface id of the user's own key for this swap.
    pub fn own_interface_id(&self) -> &[u8] {
        if self.role.is_maker() {
            &self.maker_interface_id
        } else {
            &self.taker_interface_id
        }
    }

    pub fn counterparty_interface_id(&self) -> &[u8] {
        if self.role.is_maker() {
            &self.taker_interface_id
        } else {
            &self.maker_interface_id
        }
    }
}
