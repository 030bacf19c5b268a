use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use lwk_wollet::elements::bitcoin::hashes::{Hash as _, sha256};
use swap_nursery::chain::{ContractEvent, ContractVariant, LockupValues};
use swap_nursery::nursery::{ChainNursery, EventReceiver, NurseryConfig, RetryConfig, event_channel};
use swap_nursery::swap::store::{SqliteStore, SwapRepository};
use swap_nursery::swap::{
    OrderSide, Pair, ReverseSwap, ReverseSwapStatus, Swap, SwapStatus,
};
use swap_nursery::wallet::{WalletInfo, WalletKind, WalletRegistry};

use super::fake_chain::FakeChain;

/// Chain the nursery under test settles.
pub const CHAIN: &str = "rsk";
pub const SERVICE_ADDRESS: &str = "0x8f1C6B1E2A3b4C5d6E7f8091A2b3C4d5E6f70819";
pub const TOKEN_ADDRESS: &str = "0x2aCc95758f8b5F583470bA265Eb685a8f45fC9D5";

/// 10^10 wei per base unit on an 18 decimal chain.
pub const WEI_PER_BASE_UNIT: u128 = 10_000_000_000;

pub type TestNursery = ChainNursery<SqliteStore, FakeChain>;

pub fn wallets() -> Result<WalletRegistry> {
    WalletRegistry::new([
        WalletInfo {
            symbol: "BTC".to_string(),
            chain: "bitcoin".to_string(),
            kind: WalletKind::Native,
            claim_address: "bcrt1qservice".to_string(),
            token_address: None,
            decimals: 8,
        },
        WalletInfo {
            symbol: "RBTC".to_string(),
            chain: CHAIN.to_string(),
            kind: WalletKind::Native,
            claim_address: SERVICE_ADDRESS.to_string(),
            token_address: None,
            decimals: 18,
        },
        WalletInfo {
            symbol: "USDT".to_string(),
            chain: CHAIN.to_string(),
            kind: WalletKind::Token,
            claim_address: SERVICE_ADDRESS.to_string(),
            token_address: Some(TOKEN_ADDRESS.to_string()),
            decimals: 18,
        },
    ])
}

pub fn open_store(dir: &Path) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(dir.join("swaps.sqlite3")).context("open sqlite store")?;
    Ok(Arc::new(store))
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        timeout: Duration::from_secs(1),
        max_retries: None,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter_ms: 0,
    }
}

pub fn test_config() -> NurseryConfig {
    NurseryConfig {
        lookup_retry: fast_retry(),
        ..NurseryConfig::new(CHAIN)
    }
}

pub fn nursery(
    store: Arc<SqliteStore>,
    chain: Arc<FakeChain>,
) -> Result<(TestNursery, EventReceiver)> {
    nursery_with(store, chain, test_config())
}

/// Nursery over any repository, e.g. one that injects concurrent writes.
pub fn nursery_with<R>(
    repo: Arc<R>,
    chain: Arc<FakeChain>,
    cfg: NurseryConfig,
) -> Result<(ChainNursery<R, FakeChain>, EventReceiver)>
where
    R: SwapRepository + 'static,
{
    let _ = swap_nursery::logging::init();

    let (events_tx, events_rx) = event_channel();
    let nursery = ChainNursery::new(cfg, repo, chain, Arc::new(wallets()?), events_tx);
    Ok((nursery, events_rx))
}

pub fn preimage(seed: u8) -> [u8; 32] {
    [seed; 32]
}

pub fn preimage_hash(seed: u8) -> [u8; 32] {
    sha256::Hash::hash(&preimage(seed)).to_byte_array()
}

/// Swap whose on-chain leg is RBTC: the user sells RBTC for BTC.
pub fn rbtc_swap(id: &str, seed: u8, status: SwapStatus, timeout_block_height: u32) -> Swap {
    swap(id, seed, Pair::new("RBTC", "BTC"), status, timeout_block_height)
}

pub fn swap(id: &str, seed: u8, pair: Pair, status: SwapStatus, timeout_block_height: u32) -> Swap {
    Swap {
        id: id.to_string(),
        pair,
        order_side: OrderSide::Sell,
        preimage_hash: hex::encode(preimage_hash(seed)),
        status,
        timeout_block_height,
        expected_amount: Some(1_000_000),
        invoice: Some(format!("lnbcrt10m1{id}")),
        lockup_transaction_id: None,
        lockup_transaction_vout: None,
        onchain_amount: None,
        miner_fee: 0,
        failure_reason: None,
    }
}

/// Reverse swap whose on-chain leg is RBTC: the user buys RBTC with BTC.
pub fn rbtc_reverse_swap(
    id: &str,
    seed: u8,
    status: ReverseSwapStatus,
    timeout_block_height: u32,
) -> ReverseSwap {
    ReverseSwap {
        id: id.to_string(),
        pair: Pair::new("RBTC", "BTC"),
        order_side: OrderSide::Buy,
        preimage_hash: hex::encode(preimage_hash(seed)),
        status,
        timeout_block_height,
        onchain_amount: 1_000_000,
        invoice: format!("lnbcrt10m1{id}"),
        transaction_id: None,
        transaction_vout: None,
        miner_fee: 0,
        preimage: None,
        failure_reason: None,
        raw_tx: None,
    }
}

pub fn lockup_values(seed: u8, amount: u128, timelock: u32) -> LockupValues {
    LockupValues {
        preimage_hash: preimage_hash(seed),
        amount,
        claim_address: SERVICE_ADDRESS.to_string(),
        refund_address: "0x0000000000000000000000000000000000000bad".to_string(),
        timelock,
        token_address: None,
    }
}

pub fn lockup_event(transaction_hash: &str, values: LockupValues) -> ContractEvent {
    ContractEvent::Lockup {
        contract: ContractVariant::Native,
        transaction_hash: transaction_hash.to_string(),
        transaction_vout: None,
        fee: 0,
        values,
    }
}

pub fn claim_event(transaction_hash: &str, seed: u8) -> ContractEvent {
    ContractEvent::Claim {
        contract: ContractVariant::Native,
        transaction_hash: transaction_hash.to_string(),
        preimage_hash: preimage_hash(seed),
        preimage: preimage(seed),
    }
}
