pub mod service;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::{OfferStruct, service_fee};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn from_chain(raw: U256) -> Result<Self> {
        if raw == U256::ZERO {
            Ok(Direction::Buy)
        } else if raw == U256::from(1u64) {
            Ok(Direction::Sell)
        } else {
            Err(EngineError::InvalidValue(format!("unknown offer direction {raw}")).into())
        }
    }

    pub fn to_chain(self) -> U256 {
        match self {
            Direction::Buy => U256::ZERO,
            Direction::Sell => U256::from(1u64),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

impl FromStr for Direction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Direction::Buy),
            "sell" => Ok(Direction::Sell),
            other => Err(EngineError::InvalidValue(format!("unknown direction: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    Opening,
    OpenOfferTxBroadcast,
    AwaitingPublicKeyAnnouncement,
    OfferOpened,
    Taken,
    Canceling,
    CancelOfferTxBroadcast,
    Canceled,
}

impl OfferState {
    pub const ALL: [OfferState; 8] = [
        OfferState::Opening,
        OfferState::OpenOfferTxBroadcast,
        OfferState::AwaitingPublicKeyAnnouncement,
        OfferState::OfferOpened,
        OfferState::Taken,
        OfferState::Canceling,
        OfferState::CancelOfferTxBroadcast,
        OfferState::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OfferState::Opening => "opening",
            OfferState::OpenOfferTxBroadcast => "open_offer_tx_broadcast",
            OfferState::AwaitingPublicKeyAnnouncement => "awaiting_public_key_announcement",
            OfferState::OfferOpened => "offer_opened",
            OfferState::Taken => "taken",
            OfferState::Canceling => "canceling",
            OfferState::CancelOfferTxBroadcast => "cancel_offer_tx_broadcast",
            OfferState::Canceled => "canceled",
        }
    }
}

impl FromStr for OfferState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EngineError::InvalidValue(format!("unknown offer state: {s}")))
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a user-initiated action (open, cancel, edit, take, fill,
/// report, close).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    None,
    Validating,
    SendingTransaction,
    AwaitingTransactionConfirmation,
    Completed,
    Exception,
}

impl ActionState {
    pub const ALL: [ActionState; 6] = [
        ActionState::None,
        ActionState::Validating,
        ActionState::SendingTransaction,
        ActionState::AwaitingTransactionConfirmation,
        ActionState::Completed,
        ActionState::Exception,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionState::None => "none",
            ActionState::Validating => "validating",
            ActionState::SendingTransaction => "sending_transaction",
            ActionState::AwaitingTransactionConfirmation => "awaiting_transaction_confirmation",
            ActionState::Completed => "completed",
            ActionState::Exception => "exception",
        }
    }

    /// A new attempt of the action may start from this state.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            ActionState::None | ActionState::Validating | ActionState::Exception
        )
    }
}

impl FromStr for ActionState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EngineError::InvalidValue(format!("unknown action state: {s}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatus {
    pub state: ActionState,
    pub error: Option<String>,
}

impl ActionStatus {
    pub fn new(state: ActionState) -> Self {
        Self { state, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: ActionState::Exception,
            error: Some(error.into()),
        }
    }
}

/// User actions on an offer that carry their own [`ActionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Opening,
    Canceling,
    Editing,
    Taking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementMethod {
    pub currency: String,
    pub method: String,
    pub price: String,
    /// Account details; never put on chain.
    pub private_data: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OnChainSettlementMethod {
    #[serde(rename = "f")]
    currency: String,
    #[serde(rename = "m")]
    method: String,
    #[serde(rename = "p")]
    price: String,
}

impl SettlementMethod {
    pub fn new(currency: &str, method: &str, price: &str) -> Self {
        Self {
            currency: currency.to_owned(),
            method: method.to_owned(),
            price: price.to_owned(),
            private_data: None,
        }
    }

    pub fn with_private_data(mut self, data: impl Into<String>) -> Self {
        self.private_data = Some(data.into());
        self
    }

    pub fn to_on_chain(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&OnChainSettlementMethod {
            currency: self.currency.clone(),
            method: self.method.clone(),
            price: self.price.clone(),
        })
        .context("encode settlement method")
    }

    pub fn from_on_chain(raw: &[u8]) -> Result<Self> {
        let decoded: OnChainSettlementMethod = serde_json::from_slice(raw)
            .map_err(|e| EngineError::InvalidValue(format!("settlement method json: {e}")))?;
        Ok(Self {
            currency: decoded.currency,
            method: decoded.method,
            price: decoded.price,
            private_data: None,
        })
    }

    /// Same currency, method and price; private data is ignored.
    pub fn same_public_part(&self, other: &SettlementMethod) -> bool {
        self.currency == other.currency && self.method == other.method && self.price == other.price
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub chain_id: u64,
    pub is_created: bool,
    pub is_taken: bool,
    pub maker: Address,
    pub interface_id: Vec<u8>,
    pub stablecoin: Address,
    pub amount_lower_bound: U256,
    pub amount_upper_bound: U256,
    pub security_deposit_amount: U256,
    pub service_fee_rate: U256,
    pub direction: Direction,
    pub settlement_methods: Vec<SettlementMethod>,
    pub protocol_version: U256,
    pub is_user_maker: bool,
    pub have_public_key: bool,
    pub state: OfferState,
    pub opening: ActionStatus,
    pub canceling: ActionStatus,
    pub editing: ActionStatus,
    pub taking: ActionStatus,
}

impl Offer {
    /// Builds an offer from its on-chain struct. Settlement methods carry no
    /// private data.
    pub fn from_chain(
        id: Uuid,
        raw: &OfferStruct,
        is_user_maker: bool,
        have_public_key: bool,
        state: OfferState,
    ) -> Result<Self> {
        let direction = Direction::from_chain(raw.direction)
            .with_context(|| format!("decode direction of offer {id}"))?;
        let settlement_methods = raw
            .settlement_methods
            .iter()
            .map(|m| SettlementMethod::from_on_chain(m))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("decode settlement methods of offer {id}"))?;
        Ok(Self {
            id,
            chain_id: raw.chain_id,
            is_created: raw.is_created,
            is_taken: raw.is_taken,
            maker: raw.maker,
            interface_id: raw.interface_id.clone(),
            stablecoin: raw.stablecoin,
            amount_lower_bound: raw.amount_lower_bound,
            amount_upper_bound: raw.amount_upper_bound,
            security_deposit_amount: raw.security_deposit_amount,
            service_fee_rate: raw.service_fee_rate,
            direction,
            settlement_methods,
            protocol_version: raw.protocol_version,
            is_user_maker,
            have_public_key,
            state,
            opening: ActionStatus::default(),
            canceling: ActionStatus::default(),
            editing: ActionStatus::default(),
            taking: ActionStatus::default(),
        })
    }

    pub fn to_chain(&self) -> Result<OfferStruct> {
        Ok(OfferStruct {
            is_created: self.is_created,
            is_taken: self.is_taken,
            maker: self.maker,
            interface_id: self.interface_id.clone(),
            stablecoin: self.stablecoin,
            amount_lower_bound: self.amount_lower_bound,
            amount_upper_bound: self.amount_upper_bound,
            security_deposit_amount: self.security_deposit_amount,
            service_fee_rate: self.service_fee_rate,
            direction: self.direction.to_chain(),
            settlement_methods: self
                .settlement_methods
                .iter()
                .map(SettlementMethod::to_on_chain)
                .collect::<Result<Vec<_>>>()?,
            protocol_version: self.protocol_version,
            chain_id: self.chain_id,
        })
    }

    pub fn action(&self, action: OfferAction) -> &ActionStatus {
        match action {
            OfferAction::Opening => &self.opening,
            OfferAction::Canceling => &self.canceling,
            OfferAction::Editing => &self.editing,
            OfferAction::Taking => &self.taking,
        }
    }

    pub fn action_mut(&mut self, action: OfferAction) -> &mut ActionStatus {
        match action {
            OfferAction::Opening => &mut self.opening,
            OfferAction::Canceling => &mut self.canceling,
            OfferAction::Editing => &mut self.editing,
            OfferAction::Taking => &mut self.taking,
        }
    }

    pub fn service_fee_lower_bound(&self) -> U256 {
        service_fee(self.amount_lower_bound, self.service_fee_rate)
    }

    pub fn service_fee_upper_bound(&self) -> U256 {
        service_fee(self.amount_upper_bound, self.service_fee_rate)
    }

    /// Copies private data from `local` onto methods with the same public part.
    pub fn attach_private_data(&mut self, local: &[SettlementMethod]) {
        for method in &mut self.settlement_methods {
            if let Some(found) = local.iter().find(|l| l.same_public_part(method)) {
                method.private_data = found.private_data.clone();
            }
        }
    }
}
