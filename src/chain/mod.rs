//! Boundary to the escrow contract and the node serving it.

pub mod events;
pub mod listener;
pub mod monitor;

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferStruct {
    pub is_created: bool,
    pub is_taken: bool,
    pub maker: Address,
    pub interface_id: Vec<u8>,
    pub stablecoin: Address,
    pub amount_lower_bound: U256,
    pub amount_upper_bound: U256,
    pub security_deposit_amount: U256,
    pub service_fee_rate: U256,
    pub direction: U256,
    pub settlement_methods: Vec<Vec<u8>>,
    pub protocol_version: U256,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapStruct {
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
    pub direction: U256,
    pub settlement_method: Vec<u8>,
    pub protocol_version: U256,
    pub is_payment_sent: bool,
    pub is_payment_received: bool,
    pub has_buyer_closed: bool,
    pub has_seller_closed: bool,
    pub dispute_raiser: U256,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    /// `false` if the transaction was mined but reverted.
    pub status: bool,
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub receipts: Vec<Receipt>,
}

/// Read/write access to the escrow contract. Write calls return once the
/// transaction is broadcast; confirmation is observed by the listener.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    fn escrow_address(&self) -> Address;
    /// Account the engine sends transactions from.
    fn user_address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64>;
    async fn newest_block_number(&self) -> Result<u64>;
    async fn get_block(&self, number: u64) -> Result<Block>;
    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>>;

    async fn get_offer(&self, id: Uuid) -> Result<Option<OfferStruct>>;
    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapStruct>>;
    async fn get_service_fee_rate(&self) -> Result<U256>;

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<B256>;
    async fn open_offer(&self, id: Uuid, offer: &OfferStruct) -> Result<B256>;
    async fn edit_offer(&self, id: Uuid, offer: &OfferStruct) -> Result<B256>;
    async fn cancel_offer(&self, id: Uuid) -> Result<B256>;
    async fn take_offer(&self, id: Uuid, swap: &SwapStruct) -> Result<B256>;
    async fn fill_swap(&self, id: Uuid) -> Result<B256>;
    async fn report_payment_sent(&self, id: Uuid) -> Result<B256>;
    async fn report_payment_received(&self, id: Uuid) -> Result<B256>;
    async fn close_swap(&self, id: Uuid) -> Result<B256>;
}

/// Service fee for `amount` at `rate` hundredths of a percent.
pub fn service_fee(amount: U256, rate: U256) -> U256 {
    rate.saturating_mul(amount / U256::from(10_000u64))
}
