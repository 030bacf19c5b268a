use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use lwk_wollet::ElementsNetwork;
use swap_nursery::chain::{ChainSubscriptions, ContractEvent, ContractVariant};
use swap_nursery::liquid::chain::{LiquidChain, LiquidChainConfig, spawn_block_poller};
use swap_nursery::nursery::{
    ChainNursery, NurseryConfig, NurseryEvent, RetryConfig, event_channel,
};
use swap_nursery::swap::store::SqliteStore;
use swap_nursery::wallet::WalletRegistry;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long)]
    store_path: PathBuf,

    /// JSON array of wallets: symbol, chain, kind, claim_address, token_address, decimals.
    #[arg(long)]
    wallets_file: PathBuf,

    #[arg(long, default_value = "liquid")]
    chain_id: String,

    #[arg(long, default_value = "regtest")]
    network: String,

    #[arg(long)]
    liquid_electrum_url: String,

    #[arg(long)]
    wallet_dir: PathBuf,

    #[arg(long)]
    mnemonic: String,

    #[arg(long)]
    slip77: String,

    /// JSON-lines contract event feed; `-` reads stdin.
    #[arg(long)]
    contract_events: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    block_poll_interval_secs: u64,

    #[arg(long, default_value_t = 1)]
    required_confirmations: u32,

    #[arg(long, default_value_t = 5)]
    confirmation_poll_interval_secs: u64,

    #[arg(long, default_value_t = 21_600)]
    confirmation_timeout_secs: u64,

    /// Retries unboundedly when unset.
    #[arg(long)]
    lookup_max_retries: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    swap_nursery::logging::init().ok();

    let args = Args::parse();

    std::fs::create_dir_all(&args.wallet_dir).context("create wallet_dir")?;

    let store = SqliteStore::open(args.store_path).context("open sqlite store")?;
    tracing::info!(store_path = %store.path().display(), "swap store ready");

    let wallets = WalletRegistry::load(&args.wallets_file).context("load wallets")?;
    tracing::info!(wallets = wallets.len(), chain = %args.chain_id, "wallet registry loaded");

    let network = parse_network(&args.network)?;
    let chain = LiquidChain::new(
        &args.mnemonic,
        &args.slip77,
        &args.liquid_electrum_url,
        &args.wallet_dir,
        network,
        LiquidChainConfig {
            confirmation_poll_interval: Duration::from_secs(args.confirmation_poll_interval_secs),
            confirmation_timeout: Duration::from_secs(args.confirmation_timeout_secs),
            ..LiquidChainConfig::default()
        },
    )
    .context("connect liquid chain")?;
    let chain = Arc::new(chain);

    let cfg = NurseryConfig {
        chain_id: args.chain_id,
        required_confirmations: args.required_confirmations,
        lookup_retry: RetryConfig {
            max_retries: args.lookup_max_retries,
            ..RetryConfig::default()
        },
    };

    let (events_tx, mut events_rx) = event_channel();
    let nursery = ChainNursery::new(
        cfg,
        Arc::new(store),
        chain.clone(),
        Arc::new(wallets),
        events_tx,
    );

    nursery
        .init()
        .await
        .context("recover pending reverse swap lockups")?;

    let blocks = spawn_block_poller(
        chain.clone(),
        Duration::from_secs(args.block_poll_interval_secs),
    );
    let mut subscriptions = ChainSubscriptions::new(blocks);
    if let Some(path) = args.contract_events {
        let (native_tx, native_rx) = mpsc::channel(256);
        let (token_tx, token_rx) = mpsc::channel(256);
        spawn_contract_event_feed(path, native_tx, token_tx);
        subscriptions = subscriptions.with_contract(native_rx).with_contract(token_rx);
    }

    let handle = nursery.spawn(subscriptions);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                publish(&event)?;
            }
            _ = &mut ctrl_c => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn parse_network(name: &str) -> Result<ElementsNetwork> {
    match name {
        "mainnet" | "liquid" => Ok(ElementsNetwork::Liquid),
        "testnet" => Ok(ElementsNetwork::LiquidTestnet),
        "regtest" => Ok(ElementsNetwork::default_regtest()),
        other => anyhow::bail!("unknown network {other}; expected mainnet, testnet or regtest"),
    }
}

/// Hands an event to the settlement side: one JSON line on stdout.
fn publish(event: &NurseryEvent) -> Result<()> {
    tracing::info!(event = event.name(), id = event.record_id(), "nursery event");
    let line = serde_json::to_string(event).context("encode nursery event")?;
    println!("{line}");
    Ok(())
}

fn spawn_contract_event_feed(
    path: PathBuf,
    native: mpsc::Sender<ContractEvent>,
    token: mpsc::Sender<ContractEvent>,
) {
    tokio::spawn(async move {
        if let Err(err) = feed_contract_events(&path, native, token).await {
            tracing::warn!(error = %format!("{err:#}"), "contract event feed stopped");
        }
    });
}

async fn feed_contract_events(
    path: &Path,
    native: mpsc::Sender<ContractEvent>,
    token: mpsc::Sender<ContractEvent>,
) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if path == Path::new("-") {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open contract event feed {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("read contract event")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: ContractEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed contract event");
                continue;
            }
        };

        let sender = match event.contract() {
            ContractVariant::Native => &native,
            ContractVariant::Token => &token,
        };
        if sender.send(event).await.is_err() {
            break;
        }
    }

    Ok(())
}
