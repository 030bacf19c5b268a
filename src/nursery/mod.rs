//! Per-chain swap lifecycle engine.
//!
//! A [`ChainNursery`] correlates contract events and block heights from one
//! chain with the swaps in the repository, advances their status, and emits
//! [`NurseryEvent`]s for the settlement side.

pub mod events;
mod expiry;
mod lockup;
pub mod retry;
mod reverse;
pub mod validator;

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::chain::{ChainSubscriptions, ContractEvent, ContractVariant, TransactionProvider};
use crate::swap::store::SwapRepository;
use crate::wallet::{WalletInfo, WalletKind, WalletRegistry};

pub use events::{EventReceiver, EventSender, NurseryEvent, event_channel};
pub use retry::RetryConfig;
pub use validator::{ExpectedLockup, LockupRejection, ObservedLockup, validate_lockup};

#[derive(Debug, Clone)]
pub struct NurseryConfig {
    /// Matches [`WalletInfo::chain`] of the wallets this nursery settles.
    pub chain_id: String,
    pub required_confirmations: u32,
    pub lookup_retry: RetryConfig,
}

impl NurseryConfig {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            required_confirmations: 1,
            lookup_retry: RetryConfig::default(),
        }
    }
}

pub struct ChainNursery<R, P> {
    cfg: Arc<NurseryConfig>,
    repo: Arc<R>,
    chain: Arc<P>,
    wallets: Arc<WalletRegistry>,
    events: EventSender,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl<R, P> Clone for ChainNursery<R, P> {
    fn clone(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            repo: self.repo.clone(),
            chain: self.chain.clone(),
            wallets: self.wallets.clone(),
            events: self.events.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<R, P> ChainNursery<R, P>
where
    R: SwapRepository + 'static,
    P: TransactionProvider + 'static,
{
    pub fn new(
        cfg: NurseryConfig,
        repo: Arc<R>,
        chain: Arc<P>,
        wallets: Arc<WalletRegistry>,
        events: EventSender,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            repo,
            chain,
            wallets,
            events,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.cfg.chain_id
    }

    /// Starts listening on `subscriptions`. Each event and block is handled
    /// on its own task.
    pub fn spawn(&self, subscriptions: ChainSubscriptions) -> NurseryHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut listeners = JoinSet::new();

        listeners.spawn(
            self.clone()
                .block_listener(subscriptions.blocks, shutdown_rx.clone()),
        );
        for events in subscriptions.contracts {
            listeners.spawn(self.clone().contract_listener(events, shutdown_rx.clone()));
        }

        tracing::info!(
            chain = %self.cfg.chain_id,
            contracts = listeners.len() - 1,
            "nursery listening"
        );

        NurseryHandle {
            shutdown: shutdown_tx,
            listeners,
            tasks: self.tasks.clone(),
        }
    }

    pub async fn handle_contract_event(&self, event: ContractEvent) {
        let transaction_hash = event.transaction_hash().to_string();
        let result = match &event {
            ContractEvent::Lockup {
                contract,
                transaction_hash,
                transaction_vout,
                fee,
                values,
            } => {
                self.handle_lockup(*contract, transaction_hash, *transaction_vout, *fee, values)
                    .await
            }
            ContractEvent::Claim {
                contract,
                transaction_hash,
                preimage_hash,
                preimage,
            } => {
                self.handle_claim(*contract, transaction_hash, preimage_hash, preimage)
                    .await
            }
        };

        if let Err(err) = result {
            tracing::warn!(
                chain = %self.cfg.chain_id,
                %transaction_hash,
                error = %format!("{err:#}"),
                "contract event handling failed"
            );
        }
    }

    async fn block_listener(
        self,
        mut blocks: mpsc::Receiver<u32>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                height = blocks.recv() => {
                    let Some(height) = height else { break };
                    let nursery = self.clone();
                    self.spawn_task(async move { nursery.handle_block(height).await });
                }
            }
        }
        tracing::debug!(chain = %self.cfg.chain_id, "block listener stopped");
    }

    async fn contract_listener(
        self,
        mut events: mpsc::Receiver<ContractEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let nursery = self.clone();
                    self.spawn_task(async move { nursery.handle_contract_event(event).await });
                }
            }
        }
        tracing::debug!(chain = %self.cfg.chain_id, "contract listener stopped");
    }

    /// Runs `fut` as a tracked task that [`NurseryHandle::shutdown`] aborts.
    fn spawn_task<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(fut);
    }

    /// Wallet settling `symbol` on this chain through a `contract` swap
    /// contract, if any.
    fn wallet_for(&self, symbol: &str, contract: ContractVariant) -> Option<&WalletInfo> {
        let wallet = self.wallets.resolve_on_chain(symbol, &self.cfg.chain_id)?;
        let kind_matches = matches!(
            (contract, wallet.kind),
            (ContractVariant::Native, WalletKind::Native)
                | (ContractVariant::Token, WalletKind::Token)
        );
        kind_matches.then_some(wallet)
    }

    fn emit(&self, event: NurseryEvent) {
        tracing::debug!(event = event.name(), id = event.record_id(), "emit");
        if self.events.send(event).is_err() {
            tracing::warn!(chain = %self.cfg.chain_id, "nursery event receiver dropped");
        }
    }
}

/// Owns a running nursery's listener and handler tasks.
pub struct NurseryHandle {
    shutdown: watch::Sender<bool>,
    listeners: JoinSet<()>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl NurseryHandle {
    /// Stops the listeners, then aborts in-flight handlers and confirmation
    /// watchers and waits for all of them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while self.listeners.join_next().await.is_some() {}

        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };
        tasks.shutdown().await;
    }
}
