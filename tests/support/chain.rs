use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use escrow_swap_sync::EngineError;
use escrow_swap_sync::chain::events::{ChainEvent, encode_log};
use escrow_swap_sync::chain::{Block, ChainReader, OfferStruct, RawLog, Receipt, SwapStruct};
use uuid::Uuid;

pub const CHAIN_ID: u64 = 31_337;
pub const ESCROW: Address = Address::repeat_byte(0xe5);

/// A write call as the contract saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Approve { from: Address, amount: U256 },
    OpenOffer(Uuid),
    EditOffer(Uuid),
    CancelOffer(Uuid),
    TakeOffer(Uuid),
    FillSwap(Uuid),
    ReportPaymentSent(Uuid),
    ReportPaymentReceived(Uuid),
    CloseSwap(Uuid),
}

#[derive(Default)]
struct State {
    blocks: Vec<Block>,
    pending: Vec<Receipt>,
    offers: HashMap<Uuid, OfferStruct>,
    swaps: HashMap<Uuid, SwapStruct>,
    fee_rate: U256,
    sent: Vec<Sent>,
    nonce: u64,
    offline: bool,
    revert_writes: bool,
    reject_writes: bool,
}

/// In-memory escrow contract and node. Write calls queue a receipt that
/// `mine` puts into the next block.
pub struct FakeChain {
    state: Arc<Mutex<State>>,
    user: Address,
}

impl FakeChain {
    pub fn new(user: Address) -> Arc<Self> {
        let state = State {
            blocks: vec![Block {
                number: 0,
                receipts: Vec::new(),
            }],
            fee_rate: U256::from(100u64),
            ..State::default()
        };
        Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
            user,
        })
    }

    /// The same chain seen by another account.
    pub fn as_user(&self, user: Address) -> Arc<Self> {
        Arc::new(Self {
            state: self.state.clone(),
            user,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seals pending receipts into a new block and returns its number.
    pub fn mine(&self) -> u64 {
        let mut state = self.state();
        let number = state.blocks.len() as u64;
        let receipts = std::mem::take(&mut state.pending);
        state.blocks.push(Block { number, receipts });
        number
    }

    pub fn mine_empty(&self, n: usize) {
        for _ in 0..n {
            let mut state = self.state();
            let number = state.blocks.len() as u64;
            state.blocks.push(Block {
                number,
                receipts: Vec::new(),
            });
        }
    }

    pub fn head(&self) -> u64 {
        self.state().blocks.len() as u64 - 1
    }

    /// Emits an event without a matching contract call.
    pub fn emit(&self, event: ChainEvent) -> B256 {
        let mut state = self.state();
        let hash = next_hash(&mut state);
        state.pending.push(Receipt {
            transaction_hash: hash,
            status: true,
            logs: vec![encode_log(ESCROW, &event)],
        });
        hash
    }

    /// Queues an arbitrary log, e.g. one the decoder must reject.
    pub fn emit_raw(&self, log: RawLog) {
        let mut state = self.state();
        let hash = next_hash(&mut state);
        state.pending.push(Receipt {
            transaction_hash: hash,
            status: true,
            logs: vec![log],
        });
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state().sent.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Following transactions are mined as reverted.
    pub fn set_revert_writes(&self, revert: bool) {
        self.state().revert_writes = revert;
    }

    /// Following write calls fail before broadcast.
    pub fn set_reject_writes(&self, reject: bool) {
        self.state().reject_writes = reject;
    }

    pub fn set_fee_rate(&self, rate: U256) {
        let mut state = self.state();
        state.fee_rate = rate;
        let hash = next_hash(&mut state);
        state.pending.push(Receipt {
            transaction_hash: hash,
            status: true,
            logs: vec![encode_log(
                ESCROW,
                &ChainEvent::ServiceFeeRateChanged {
                    new_service_fee_rate: rate,
                },
            )],
        });
    }

    pub fn offer(&self, id: Uuid) -> Option<OfferStruct> {
        self.state().offers.get(&id).cloned()
    }

    pub fn swap(&self, id: Uuid) -> Option<SwapStruct> {
        self.state().swaps.get(&id).cloned()
    }

    fn check_online(&self) -> Result<()> {
        if self.state().offline {
            return Err(EngineError::Connectivity("connection refused".into()).into());
        }
        Ok(())
    }

    /// Records the call and, unless reverting, applies `apply` and emits what
    /// it returns.
    fn write(
        &self,
        sent: Sent,
        apply: impl FnOnce(&mut State, Address) -> Result<Option<ChainEvent>>,
    ) -> Result<B256> {
        self.check_online()?;
        let mut state = self.state();
        if state.reject_writes {
            anyhow::bail!("nonce too low");
        }
        state.sent.push(sent);
        let hash = next_hash(&mut state);
        if state.revert_writes {
            state.pending.push(Receipt {
                transaction_hash: hash,
                status: false,
                logs: Vec::new(),
            });
            return Ok(hash);
        }
        let event = apply(&mut state, self.user)?;
        state.pending.push(Receipt {
            transaction_hash: hash,
            status: true,
            logs: event.iter().map(|e| encode_log(ESCROW, e)).collect(),
        });
        Ok(hash)
    }

    fn swap_event(
        &self,
        sent: Sent,
        id: Uuid,
        apply: impl FnOnce(&mut SwapStruct, Address) -> ChainEvent,
    ) -> Result<B256> {
        self.write(sent, |state, user| {
            let swap = state
                .swaps
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no swap {id}"))?;
            Ok(Some(apply(swap, user)))
        })
    }
}

fn next_hash(state: &mut State) -> B256 {
    state.nonce += 1;
    B256::left_padding_from(&state.nonce.to_be_bytes())
}

fn buyer(swap: &SwapStruct) -> Address {
    if swap.direction.is_zero() {
        swap.maker
    } else {
        swap.taker
    }
}

#[async_trait::async_trait]
impl ChainReader for FakeChain {
    fn escrow_address(&self) -> Address {
        ESCROW
    }

    fn user_address(&self) -> Address {
        self.user
    }

    async fn chain_id(&self) -> Result<u64> {
        self.check_online()?;
        Ok(CHAIN_ID)
    }

    async fn newest_block_number(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.head())
    }

    async fn get_block(&self, number: u64) -> Result<Block> {
        self.check_online()?;
        self.state()
            .blocks
            .get(number as usize)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("block {number} not found"))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        self.check_online()?;
        Ok(self
            .state()
            .blocks
            .iter()
            .flat_map(|b| b.receipts.iter())
            .find(|r| r.transaction_hash == hash)
            .cloned())
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<OfferStruct>> {
        self.check_online()?;
        Ok(self.offer(id))
    }

    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapStruct>> {
        self.check_online()?;
        Ok(self.swap(id))
    }

    async fn get_service_fee_rate(&self) -> Result<U256> {
        self.check_online()?;
        Ok(self.state().fee_rate)
    }

    async fn approve(&self, _token: Address, spender: Address, amount: U256) -> Result<B256> {
        anyhow::ensure!(spender == ESCROW, "approval for unexpected spender {spender}");
        self.write(
            Sent::Approve {
                from: self.user,
                amount,
            },
            |_, _| Ok(None),
        )
    }

    async fn open_offer(&self, id: Uuid, offer: &OfferStruct) -> Result<B256> {
        let offer = offer.clone();
        self.write(Sent::OpenOffer(id), move |state, user| {
            anyhow::ensure!(offer.maker == user, "maker must be sender");
            let interface_id = offer.interface_id.clone();
            state.offers.insert(
                id,
                OfferStruct {
                    chain_id: CHAIN_ID,
                    ..offer
                },
            );
            Ok(Some(ChainEvent::OfferOpened {
                offer_id: id,
                interface_id,
            }))
        })
    }

    async fn edit_offer(&self, id: Uuid, offer: &OfferStruct) -> Result<B256> {
        let methods = offer.settlement_methods.clone();
        self.write(Sent::EditOffer(id), move |state, _| {
            let stored = state
                .offers
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no offer {id}"))?;
            stored.settlement_methods = methods;
            Ok(Some(ChainEvent::OfferEdited { offer_id: id }))
        })
    }

    async fn cancel_offer(&self, id: Uuid) -> Result<B256> {
        self.write(Sent::CancelOffer(id), move |state, _| {
            state.offers.remove(&id);
            Ok(Some(ChainEvent::OfferCanceled { offer_id: id }))
        })
    }

    async fn take_offer(&self, id: Uuid, swap: &SwapStruct) -> Result<B256> {
        let swap = swap.clone();
        self.write(Sent::TakeOffer(id), move |state, user| {
            let offer = state
                .offers
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no offer {id}"))?;
            anyhow::ensure!(!offer.is_taken, "offer {id} already taken");
            offer.is_taken = true;
            let taker_interface_id = swap.taker_interface_id.clone();
            state.swaps.insert(
                id,
                SwapStruct {
                    taker: user,
                    chain_id: CHAIN_ID,
                    ..swap
                },
            );
            Ok(Some(ChainEvent::OfferTaken {
                offer_id: id,
                taker_interface_id,
            }))
        })
    }

    async fn fill_swap(&self, id: Uuid) -> Result<B256> {
        self.swap_event(Sent::FillSwap(id), id, |swap, _| {
            swap.requires_fill = false;
            ChainEvent::SwapFilled { swap_id: id }
        })
    }

    async fn report_payment_sent(&self, id: Uuid) -> Result<B256> {
        self.swap_event(Sent::ReportPaymentSent(id), id, |swap, _| {
            swap.is_payment_sent = true;
            ChainEvent::PaymentSent { swap_id: id }
        })
    }

    async fn report_payment_received(&self, id: Uuid) -> Result<B256> {
        self.swap_event(Sent::ReportPaymentReceived(id), id, |swap, _| {
            swap.is_payment_received = true;
            ChainEvent::PaymentReceived { swap_id: id }
        })
    }

    async fn close_swap(&self, id: Uuid) -> Result<B256> {
        self.swap_event(Sent::CloseSwap(id), id, |swap, user| {
            if buyer(swap) == user {
                swap.has_buyer_closed = true;
                ChainEvent::BuyerClosed { swap_id: id }
            } else {
                swap.has_seller_closed = true;
                ChainEvent::SellerClosed { swap_id: id }
            }
        })
    }
}
