use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::events::{EventRecord, decode_log};
use super::monitor::{MonitoredTransaction, TransactionMonitor};
use super::{Block, ChainReader};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Consumer of parsed blocks. `dispatch_block` must be idempotent: a block is
/// delivered again if a previous delivery returned an error.
#[async_trait::async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch_block(
        &self,
        chain_id: u64,
        block_number: u64,
        events: Vec<EventRecord>,
    ) -> Result<()>;

    async fn handle_failed_transaction(
        &self,
        tx: MonitoredTransaction,
        error: EngineError,
    ) -> Result<()>;
}

/// Receives every error the listener runs into.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, error: &anyhow::Error);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorNotifier;

impl ErrorNotifier for LogErrorNotifier {
    fn notify(&self, error: &anyhow::Error) {
        tracing::error!(error = %format!("{error:#}"), "event listener error");
    }
}

pub struct EventListener {
    reader: Arc<dyn ChainReader>,
    dispatcher: Arc<dyn EventDispatcher>,
    notifier: Arc<dyn ErrorNotifier>,
    monitor: TransactionMonitor,
    poll_interval: Duration,
    transaction_timeout: Duration,
    chain_id: Option<u64>,
    last_parsed: u64,
}

/// Handle to a running listener. Dropping it stops the listener.
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
    progress: watch::Receiver<u64>,
    task: JoinHandle<u64>,
}

impl ListenerHandle {
    pub fn last_parsed(&self) -> u64 {
        *self.progress.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the loop to stop and waits for it. Returns the last parsed block.
    pub async fn stop(self) -> Result<u64> {
        let _ = self.stop.send(true);
        self.task.await.context("join event listener task")
    }

    /// Waits for the loop to end on its own.
    pub async fn join(self) -> Result<u64> {
        let ListenerHandle { stop, task, .. } = self;
        let last = task.await.context("join event listener task");
        drop(stop);
        last
    }
}

impl EventListener {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        dispatcher: Arc<dyn EventDispatcher>,
        notifier: Arc<dyn ErrorNotifier>,
        monitor: TransactionMonitor,
        cfg: &EngineConfig,
        last_parsed: u64,
    ) -> Self {
        Self {
            reader,
            dispatcher,
            notifier,
            monitor,
            poll_interval: cfg.poll_interval(),
            transaction_timeout: cfg.transaction_timeout(),
            chain_id: None,
            last_parsed,
        }
    }

    pub fn last_parsed(&self) -> u64 {
        self.last_parsed
    }

    pub fn start(self) -> ListenerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(self.last_parsed);
        let task = tokio::spawn(self.run(stop_rx, progress_tx));
        ListenerHandle {
            stop: stop_tx,
            progress: progress_rx,
            task,
        }
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>, progress: watch::Sender<u64>) -> u64 {
        tracing::info!(last_parsed = self.last_parsed, "event listener started");
        loop {
            if *stop.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(true) => {
                    let _ = progress.send(self.last_parsed);
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    self.notifier.notify(&err);
                    if EngineError::is_connectivity(&err) {
                        tracing::error!(
                            error = %format!("{err:#}"),
                            last_parsed = self.last_parsed,
                            "lost connection to node, stopping event listener"
                        );
                        break;
                    }
                    tracing::warn!(
                        error = %format!("{err:#}"),
                        block = self.last_parsed + 1,
                        "failed to parse block, retrying"
                    );
                }
            }

            if self.sleep_or_stop(&mut stop).await {
                break;
            }
        }
        tracing::info!(last_parsed = self.last_parsed, "event listener stopped");
        self.last_parsed
    }

    async fn sleep_or_stop(&self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => false,
            changed = stop.changed() => changed.is_err() || *stop.borrow(),
        }
    }

    /// Parses at most one block. Returns `true` if the cursor advanced.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let newest = self
            .reader
            .newest_block_number()
            .await
            .context("get newest block number")?;
        if newest <= self.last_parsed {
            self.report_expired().await;
            return Ok(false);
        }

        let number = self.last_parsed + 1;
        let block = self
            .reader
            .get_block(number)
            .await
            .with_context(|| format!("get block {number}"))?;
        let chain_id = match self.chain_id {
            Some(id) => id,
            None => {
                let id = self.reader.chain_id().await.context("get chain id")?;
                self.chain_id = Some(id);
                id
            }
        };

        let (events, seen) = self
            .parse_block(&block, chain_id)
            .with_context(|| format!("parse block {number}"))?;
        let event_count = events.len();
        self.dispatcher
            .dispatch_block(chain_id, number, events)
            .await
            .with_context(|| format!("dispatch events of block {number}"))?;

        for (tx, succeeded) in seen {
            self.monitor.remove(&tx.hash);
            if !succeeded {
                let error = EngineError::TransactionFailed(format!(
                    "transaction {} reverted in block {number}",
                    tx.hash
                ));
                self.report_failed(tx, error).await;
            }
        }
        self.report_expired().await;

        self.last_parsed = number;
        tracing::debug!(block = number, events = event_count, "parsed block");
        Ok(true)
    }

    fn parse_block(
        &self,
        block: &Block,
        chain_id: u64,
    ) -> Result<(Vec<EventRecord>, Vec<(MonitoredTransaction, bool)>)> {
        let escrow = self.reader.escrow_address();
        let mut events = Vec::new();
        let mut seen = Vec::new();
        for receipt in &block.receipts {
            if let Some(tx) = self.monitor.get(&receipt.transaction_hash) {
                seen.push((tx, receipt.status));
            }
            if !receipt.status {
                continue;
            }
            for log in &receipt.logs {
                if let Some(event) = decode_log(escrow, log)? {
                    events.push(EventRecord {
                        event,
                        chain_id,
                        transaction_hash: receipt.transaction_hash,
                    });
                }
            }
        }
        Ok((events, seen))
    }

    async fn report_expired(&self) {
        for tx in self
            .monitor
            .take_expired(self.transaction_timeout, Instant::now())
        {
            let error = EngineError::TransactionFailed(format!(
                "transaction {} not confirmed within {}s",
                tx.hash,
                self.transaction_timeout.as_secs()
            ));
            self.report_failed(tx, error).await;
        }
    }

    async fn report_failed(&self, tx: MonitoredTransaction, error: EngineError) {
        tracing::warn!(tx_hash = %tx.hash, kind = ?tx.kind, entity_id = %tx.entity_id, %error, "monitored transaction failed");
        let hash = tx.hash;
        if let Err(err) = self.dispatcher.handle_failed_transaction(tx, error).await {
            let err = err.context(format!("handle failed transaction {hash}"));
            self.notifier.notify(&err);
        }
    }
}
