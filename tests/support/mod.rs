#![allow(dead_code)]

pub mod chain;
pub mod peers;
pub mod wait;

use std::path::Path;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, U256};
use anyhow::{Context as _, Result};
use escrow_swap_sync::Coordinator;
use escrow_swap_sync::chain::listener::{ErrorNotifier, EventListener, LogErrorNotifier};
use escrow_swap_sync::config::EngineConfig;
use escrow_swap_sync::keys::{KeyPair, StoreKeyStore};
use escrow_swap_sync::offer::validation::{NewOfferData, NewSwapData};
use escrow_swap_sync::offer::{Direction, SettlementMethod};
use escrow_swap_sync::store::{self, SharedStore, SqliteStore};

use tempfile::TempDir;
use uuid::Uuid;

use chain::{CHAIN_ID, FakeChain};
use peers::RecordingMessenger;

pub const STABLECOIN: Address = Address::repeat_byte(0x5c);

/// One user's engine over a shared fake chain.
pub struct Party {
    pub engine: Coordinator,
    pub chain: Arc<FakeChain>,
    pub messenger: Arc<RecordingMessenger>,
    pub store: SharedStore,
    pub cfg: EngineConfig,
}

impl Party {
    /// A listener driven by hand with `poll_once`.
    pub fn listener(&self, last_parsed: u64) -> EventListener {
        EventListener::new(
            self.chain.clone(),
            Arc::new(self.engine.clone()),
            Arc::new(LogErrorNotifier),
            self.engine.monitor().clone(),
            &self.cfg,
            last_parsed,
        )
    }

    /// Hands every message this party sent to `to`.
    pub async fn deliver_to(&self, to: &Party) -> Result<usize> {
        let msgs = self.messenger.take();
        let n = msgs.len();
        for msg in msgs {
            to.engine.handle_peer_message(msg).await?;
        }
        Ok(n)
    }
}

pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        store_path: dir.join("engine.sqlite3"),
        poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn party(chain: Arc<FakeChain>, cfg: EngineConfig) -> Result<Party> {
    let store = store::shared(SqliteStore::open(cfg.store_path.clone()).context("open store")?);
    let messenger = Arc::new(RecordingMessenger::default());
    let engine = Coordinator::new(
        chain.clone(),
        Arc::new(StoreKeyStore::new(store.clone())),
        messenger.clone(),
        store.clone(),
        cfg.clone(),
    );
    engine.restore()?;
    Ok(Party {
        engine,
        chain,
        messenger,
        store,
        cfg,
    })
}

pub fn key_pair(seed: u8) -> KeyPair {
    KeyPair::new(vec![seed; 33], vec![seed.wrapping_add(1); 32])
}

/// 1 token with 18 decimals.
pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn sepa() -> SettlementMethod {
    SettlementMethod::new("EUR", "SEPA", "0.94")
}

pub fn offer_data(direction: Direction) -> NewOfferData {
    NewOfferData {
        stablecoin: STABLECOIN,
        amount_lower_bound: tokens(100),
        amount_upper_bound: tokens(200),
        security_deposit_amount: tokens(20),
        direction,
        settlement_methods: vec![sepa().with_private_data("IBAN DE00 maker")],
    }
}

pub const MAKER: Address = Address::repeat_byte(0x11);
pub const TAKER: Address = Address::repeat_byte(0x22);

/// A maker and a taker on one chain, each with its own store and a listener
/// driven by hand.
pub struct Market {
    pub maker: Party,
    pub taker: Party,
    pub maker_listener: EventListener,
    pub taker_listener: EventListener,
    _dir: TempDir,
}

impl Market {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let chain = FakeChain::new(MAKER);
        let maker = party(chain.clone(), test_config(&dir.path().join("maker")))?;
        let taker = party(chain.as_user(TAKER), test_config(&dir.path().join("taker")))?;
        let maker_listener = maker.listener(0);
        let taker_listener = taker.listener(0);
        Ok(Self {
            maker,
            taker,
            maker_listener,
            taker_listener,
            _dir: dir,
        })
    }

    pub fn chain(&self) -> &FakeChain {
        &self.maker.chain
    }

    /// Mines pending transactions and lets both parties parse them.
    pub async fn mine_and_sync(&mut self) -> Result<()> {
        self.chain().mine();
        catch_up(&mut self.maker_listener).await?;
        catch_up(&mut self.taker_listener).await?;
        Ok(())
    }

    /// Maker opens `direction` offer; both parties see it opened and the
    /// taker has the maker's public key.
    pub async fn open_offer(&mut self, direction: Direction) -> Result<Uuid> {
        let offer = self
            .maker
            .engine
            .offers()
            .open_offer(offer_data(direction), key_pair(1))
            .await?;
        self.mine_and_sync().await?;
        self.maker.deliver_to(&self.taker).await?;
        Ok(offer.id)
    }

    /// Opens and takes an offer and runs the settlement-detail exchange.
    pub async fn taken_swap(&mut self, direction: Direction) -> Result<Uuid> {
        let id = self.open_offer(direction).await?;
        self.taker
            .engine
            .swaps()
            .take_offer(
                id,
                CHAIN_ID,
                NewSwapData {
                    taken_swap_amount: tokens(150),
                    settlement_method: sepa().with_private_data("IBAN DE22 taker"),
                },
                key_pair(2),
            )
            .await?;
        self.mine_and_sync().await?;
        self.taker.deliver_to(&self.maker).await?;
        self.maker.deliver_to(&self.taker).await?;
        Ok(id)
    }
}

/// Records listener errors.
#[derive(Default)]
pub struct RecordingNotifier {
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl ErrorNotifier for RecordingNotifier {
    fn notify(&self, error: &anyhow::Error) {
        self.errors.lock().unwrap().push(format!("{error:#}"));
    }
}

/// Polls until the listener has caught up with the chain head.
pub async fn catch_up(listener: &mut EventListener) -> Result<u64> {
    while listener.poll_once().await? {}
    Ok(listener.last_parsed())
}
