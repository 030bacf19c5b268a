use std::path::Path;
use std::str::FromStr as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use lwk_signer::SwSigner;
use lwk_wollet::blocking::BlockchainBackend as _;
use lwk_wollet::elements::{Script, Txid};
use lwk_wollet::{
    ElectrumClient, ElectrumUrl, ElementsNetwork, History, Wollet, WolletDescriptor,
    full_scan_with_electrum_client,
};
use tokio::sync::mpsc;

use crate::chain::{ConfirmationError, TransactionHandle, TransactionLookup, TransactionProvider};

#[derive(Debug, Clone)]
pub struct LiquidChainConfig {
    pub confirmation_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    /// Consecutive polls a transaction may be missing (or the backend may
    /// fail) before the wait gives up.
    pub missing_polls_before_drop: u32,
}

impl Default for LiquidChainConfig {
    fn default() -> Self {
        Self {
            confirmation_poll_interval: Duration::from_secs(5),
            confirmation_timeout: Duration::from_secs(6 * 60 * 60),
            missing_polls_before_drop: 12,
        }
    }
}

struct Backend {
    wollet: Wollet,
    client: ElectrumClient,
}

impl Backend {
    fn sync(&mut self) -> Result<()> {
        full_scan_with_electrum_client(&mut self.wollet, &mut self.client)
            .context("sync wollet via electrum")
    }

    fn tip_height(&mut self) -> Result<u32> {
        self.sync()?;
        Ok(self.wollet.tip().height())
    }

    fn confirmations(&mut self, script_pubkey: &Script, txid: &Txid) -> Result<Option<u32>> {
        let mut histories = self
            .client
            .get_scripts_history(&[script_pubkey])
            .context("get script history")?;
        let history: Vec<History> = histories.pop().unwrap_or_default();
        let Some(entry) = history.into_iter().find(|h| &h.txid == txid) else {
            return Ok(None);
        };

        if entry.height <= 0 {
            return Ok(Some(0));
        }

        let height = u32::try_from(entry.height).context("history height must be positive")?;
        let tip = self.tip_height()?;
        if tip < height {
            return Ok(Some(0));
        }
        Ok(Some(tip - height + 1))
    }
}

/// Liquid transaction lookups and block heights over Electrum.
pub struct LiquidChain {
    backend: Arc<Mutex<Backend>>,
    cfg: LiquidChainConfig,
}

impl LiquidChain {
    pub fn new(
        mnemonic: &str,
        slip77_key: &str,
        electrum_url: &str,
        persist_dir: &Path,
        network: ElementsNetwork,
        cfg: LiquidChainConfig,
    ) -> Result<Self> {
        let signer = SwSigner::new(mnemonic, false).context("create SwSigner")?;
        let xpub = signer.xpub();

        let desc_str = format!("ct(slip77({slip77_key}),elwpkh({xpub}/*))");
        let descriptor: WolletDescriptor = desc_str.parse().context("parse wollet descriptor")?;

        let wollet =
            Wollet::with_fs_persist(network, descriptor, persist_dir).context("create wollet")?;
        let client = electrum_client(electrum_url).context("create electrum client")?;

        let mut backend = Backend { wollet, client };
        backend.sync().context("initial sync")?;

        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            cfg,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Backend) -> Result<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let mut backend = backend
                .lock()
                .map_err(|_| anyhow::anyhow!("liquid backend mutex poisoned"))?;
            f(&mut *backend)
        })
        .await
        .context("join liquid backend task")?
    }

    pub async fn tip_height(&self) -> Result<u32> {
        self.blocking(|backend| backend.tip_height()).await
    }

    async fn confirmations(&self, handle: &TransactionHandle) -> Result<Option<u32>> {
        let txid = Txid::from_str(&handle.id).context("parse txid")?;
        let script_hex = handle
            .watch_script
            .as_deref()
            .context("transaction handle has no watch script")?;
        let script = Script::from(hex::decode(script_hex).context("decode watch script")?);

        self.blocking(move |backend| backend.confirmations(&script, &txid))
            .await
    }
}

/// Emits the tip height whenever it advances. Stops once the receiver is
/// dropped.
pub fn spawn_block_poller(chain: Arc<LiquidChain>, interval: Duration) -> mpsc::Receiver<u32> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut last: Option<u32> = None;
        loop {
            match chain.tip_height().await {
                Ok(height) if last.is_none_or(|l| height > l) => {
                    last = Some(height);
                    tracing::debug!(height, "liquid tip advanced");
                    if tx.send(height).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "liquid tip poll failed");
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });

    rx
}

#[async_trait]
impl TransactionProvider for LiquidChain {
    async fn get_transaction(&self, id: &str) -> TransactionLookup {
        let txid = match Txid::from_str(id) {
            Ok(txid) => txid,
            Err(err) => {
                tracing::warn!(transaction_id = id, error = %err, "unparseable txid");
                return TransactionLookup::DefinitelyAbsent;
            }
        };

        let result = self
            .blocking(move |backend| {
                let mut txs = backend
                    .client
                    .get_transactions(&[txid])
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                Ok(txs.pop())
            })
            .await;

        match result {
            Ok(Some(tx)) => {
                let watch_script = tx
                    .output
                    .iter()
                    .find(|o| !o.is_fee())
                    .map(|o| hex::encode(o.script_pubkey.as_bytes()));
                TransactionLookup::Found(TransactionHandle {
                    id: id.to_string(),
                    watch_script,
                })
            }
            Ok(None) => TransactionLookup::DefinitelyAbsent,
            Err(err) => classify_lookup_error(&format!("{err:#}")),
        }
    }

    async fn await_confirmations(
        &self,
        handle: &TransactionHandle,
        confirmations: u32,
    ) -> Result<(), ConfirmationError> {
        let started = Instant::now();
        let mut missing = 0u32;
        let mut failing = 0u32;

        loop {
            match self.confirmations(handle).await {
                Ok(Some(confs)) if confs >= confirmations => return Ok(()),
                Ok(Some(_)) => {
                    missing = 0;
                    failing = 0;
                }
                Ok(None) => {
                    missing += 1;
                    if missing >= self.cfg.missing_polls_before_drop {
                        return Err(ConfirmationError::Dropped(handle.id.clone()));
                    }
                }
                Err(err) => {
                    failing += 1;
                    tracing::debug!(
                        transaction_id = %handle.id,
                        error = %format!("{err:#}"),
                        "confirmation poll failed"
                    );
                    if failing >= self.cfg.missing_polls_before_drop {
                        return Err(ConfirmationError::Provider(format!("{err:#}")));
                    }
                }
            }

            if started.elapsed() >= self.cfg.confirmation_timeout {
                return Err(ConfirmationError::TimedOut {
                    id: handle.id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(self.cfg.confirmation_poll_interval).await;
        }
    }
}

/// Electrum servers answer unknown txids with an error, not an empty result.
/// Only that answer means absent; every other error may clear up.
pub fn classify_lookup_error(message: &str) -> TransactionLookup {
    const UNKNOWN_TXID: &str = "no such mempool or blockchain transaction";

    if message.to_ascii_lowercase().contains(UNKNOWN_TXID) {
        TransactionLookup::DefinitelyAbsent
    } else {
        TransactionLookup::TransientFailure(message.to_string())
    }
}

fn electrum_client(url: &str) -> Result<ElectrumClient> {
    let endpoint = url.trim_start_matches("tcp://");
    let electrum_url = ElectrumUrl::new(endpoint, false, false)
        .with_context(|| format!("parse electrum url {endpoint}"))?;
    ElectrumClient::new(&electrum_url).context("create electrum client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn electrs_missing_tx_is_absent() {
        assert_eq!(
            classify_lookup_error(
                "get transaction: No such mempool or blockchain transaction. Use gettransaction for wallet transactions."
            ),
            TransactionLookup::DefinitelyAbsent
        );
    }

    #[test]
    fn connection_errors_are_transient() {
        for message in [
            "Connection refused (os error 111)",
            "electrum connect: dns error: host not found",
            "failed to lookup address information: Name or service not known",
            "I/O error: connection reset by peer",
        ] {
            let lookup = classify_lookup_error(message);
            assert!(
                matches!(lookup, TransactionLookup::TransientFailure(_)),
                "{message}: {lookup:?}"
            );
        }
    }
}
