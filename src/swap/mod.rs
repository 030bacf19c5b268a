pub mod status;
pub mod store;

use std::fmt;
use std::str::FromStr;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub use status::{ReverseSwapStatus, SwapStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => anyhow::bail!("unknown order side: {other}"),
        }
    }
}

/// A trading pair written `BASE/QUOTE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Currency whose chain carries the on-chain leg of the swap.
    ///
    /// A normal swap locks up what the user sells; a reverse swap locks up
    /// what the user buys.
    pub fn chain_currency(&self, side: OrderSide, reverse: bool) -> &str {
        match (reverse, side) {
            (false, OrderSide::Buy) | (true, OrderSide::Sell) => &self.quote,
            (false, OrderSide::Sell) | (true, OrderSide::Buy) => &self.base,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .with_context(|| format!("pair must be BASE/QUOTE: {s}"))?;
        anyhow::ensure!(
            !base.is_empty() && !quote.is_empty(),
            "pair must be BASE/QUOTE: {s}"
        );
        Ok(Self::new(base, quote))
    }
}

impl TryFrom<String> for Pair {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

/// On-chain to Lightning swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub id: String,
    pub pair: Pair,
    pub order_side: OrderSide,
    pub preimage_hash: String,
    pub status: SwapStatus,
    pub timeout_block_height: u32,
    /// Minimum lockup in 10^8 base units.
    pub expected_amount: Option<u64>,
    pub invoice: Option<String>,

    pub lockup_transaction_id: Option<String>,
    pub lockup_transaction_vout: Option<u32>,
    pub onchain_amount: Option<u64>,
    pub miner_fee: u64,
    pub failure_reason: Option<String>,
}

impl Swap {
    pub fn chain_currency(&self) -> &str {
        self.pair.chain_currency(self.order_side, false)
    }
}

/// Lightning to on-chain swap; the service locks up coins for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSwap {
    pub id: String,
    pub pair: Pair,
    pub order_side: OrderSide,
    pub preimage_hash: String,
    pub status: ReverseSwapStatus,
    pub timeout_block_height: u32,
    pub onchain_amount: u64,
    pub invoice: String,

    pub transaction_id: Option<String>,
    pub transaction_vout: Option<u32>,
    pub miner_fee: u64,
    pub preimage: Option<String>,
    pub failure_reason: Option<String>,
    pub raw_tx: Option<String>,
}

impl ReverseSwap {
    pub fn chain_currency(&self) -> &str {
        self.pair.chain_currency(self.order_side, true)
    }
}

/// Fields written by [`store::SwapRepository::update_swap`]. `None` leaves a
/// column untouched; `add_miner_fee` accumulates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapUpdate {
    pub status: Option<SwapStatus>,
    pub lockup_transaction_id: Option<String>,
    pub lockup_transaction_vout: Option<u32>,
    pub onchain_amount: Option<u64>,
    pub add_miner_fee: Option<u64>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseSwapUpdate {
    pub status: Option<ReverseSwapStatus>,
    pub transaction_id: Option<String>,
    pub transaction_vout: Option<u32>,
    pub add_miner_fee: Option<u64>,
    pub preimage: Option<String>,
    pub failure_reason: Option<String>,
    pub raw_tx: Option<String>,
}

/// Conjunctive query predicate over swap records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter<S> {
    pub preimage_hash: Option<String>,
    pub status_in: Option<Vec<S>>,
    pub status_not_in: Option<Vec<S>>,
    pub timeout_at_or_below: Option<u32>,
    pub timeout_at_or_above: Option<u32>,
}

impl<S> Default for RecordFilter<S> {
    fn default() -> Self {
        Self {
            preimage_hash: None,
            status_in: None,
            status_not_in: None,
            timeout_at_or_below: None,
            timeout_at_or_above: None,
        }
    }
}

impl<S: Copy> RecordFilter<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preimage_hash(mut self, preimage_hash: impl Into<String>) -> Self {
        self.preimage_hash = Some(preimage_hash.into());
        self
    }

    pub fn status_in(mut self, statuses: &[S]) -> Self {
        self.status_in = Some(statuses.to_vec());
        self
    }

    pub fn status_not_in(mut self, statuses: &[S]) -> Self {
        self.status_not_in = Some(statuses.to_vec());
        self
    }

    pub fn timeout_at_or_below(mut self, height: u32) -> Self {
        self.timeout_at_or_below = Some(height);
        self
    }

    pub fn timeout_at_or_above(mut self, height: u32) -> Self {
        self.timeout_at_or_above = Some(height);
        self
    }
}

pub type SwapFilter = RecordFilter<SwapStatus>;
pub type ReverseSwapFilter = RecordFilter<ReverseSwapStatus>;
