//! Contracts for the chain side of the nursery: contract events, block
//! heights, and transaction lookup/confirmation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractVariant {
    /// Swap contract locking the chain's native asset.
    Native,
    /// Swap contract locking a token.
    Token,
}

impl ContractVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractVariant::Native => "native",
            ContractVariant::Token => "token",
        }
    }
}

/// Values a swap contract logged for a lockup. `amount` is in the chain's
/// native fixed-point unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockupValues {
    #[serde(with = "hex::serde")]
    pub preimage_hash: [u8; 32],
    pub amount: u128,
    pub claim_address: String,
    pub refund_address: String,
    pub timelock: u32,
    #[serde(default)]
    pub token_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContractEvent {
    Lockup {
        contract: ContractVariant,
        transaction_hash: String,
        #[serde(default)]
        transaction_vout: Option<u32>,
        /// Fee paid by the lockup transaction, native units.
        #[serde(default)]
        fee: u128,
        values: LockupValues,
    },
    Claim {
        contract: ContractVariant,
        transaction_hash: String,
        #[serde(with = "hex::serde")]
        preimage_hash: [u8; 32],
        #[serde(with = "hex::serde")]
        preimage: [u8; 32],
    },
}

impl ContractEvent {
    pub fn contract(&self) -> ContractVariant {
        match self {
            ContractEvent::Lockup { contract, .. } | ContractEvent::Claim { contract, .. } => {
                *contract
            }
        }
    }

    pub fn transaction_hash(&self) -> &str {
        match self {
            ContractEvent::Lockup {
                transaction_hash, ..
            }
            | ContractEvent::Claim {
                transaction_hash, ..
            } => transaction_hash,
        }
    }
}

/// A transaction known to the provider, ready to be watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub id: String,
    /// Hex output script the provider polls for confirmations, if it needs one.
    pub watch_script: Option<String>,
}

impl TransactionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            watch_script: None,
        }
    }
}

/// Outcome of looking a transaction up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionLookup {
    Found(TransactionHandle),
    /// The backend answered and does not know the transaction.
    DefinitelyAbsent,
    /// The backend could not answer; the lookup may succeed later.
    TransientFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("transaction {0} dropped from mempool")]
    Dropped(String),
    #[error("transaction {id} replaced by {replacement}")]
    Replaced { id: String, replacement: String },
    #[error("timed out after {waited_secs}s waiting for {id} to confirm")]
    TimedOut { id: String, waited_secs: u64 },
    #[error("chain provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait TransactionProvider: Send + Sync {
    async fn get_transaction(&self, id: &str) -> TransactionLookup;

    /// Resolves once `handle` has `confirmations` confirmations.
    async fn await_confirmations(
        &self,
        handle: &TransactionHandle,
        confirmations: u32,
    ) -> Result<(), ConfirmationError>;
}

/// Subscriptions one chain nursery consumes: block heights plus one contract
/// event stream per contract variant deployed on the chain.
#[derive(Debug)]
pub struct ChainSubscriptions {
    pub blocks: mpsc::Receiver<u32>,
    pub contracts: Vec<mpsc::Receiver<ContractEvent>>,
}

impl ChainSubscriptions {
    pub fn new(blocks: mpsc::Receiver<u32>) -> Self {
        Self {
            blocks,
            contracts: Vec::new(),
        }
    }

    pub fn with_contract(mut self, events: mpsc::Receiver<ContractEvent>) -> Self {
        self.contracts.push(events);
        self
    }
}
