use serde::Serialize;
use tokio::sync::mpsc;

use crate::chain::{ContractVariant, LockupValues};
use crate::nursery::validator::LockupRejection;
use crate::swap::{ReverseSwap, Swap};

/// Everything a chain nursery tells the settlement side. Each variant carries
/// the record as stored after the nursery's update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NurseryEvent {
    LockupFailed {
        swap: Swap,
        reason: LockupRejection,
    },
    /// A swap lockup passed validation; the user's invoice can be paid.
    ContractLockup {
        contract: ContractVariant,
        swap: Swap,
        transaction_hash: String,
        values: LockupValues,
    },
    ReverseLockupMempool {
        reverse_swap: ReverseSwap,
        transaction_hash: String,
    },
    LockupConfirmed {
        reverse_swap: ReverseSwap,
        transaction_hash: String,
    },
    LockupFailedToSend {
        reverse_swap: ReverseSwap,
        reason: String,
    },
    /// The user claimed a reverse swap lockup, revealing the preimage that
    /// settles the hold invoice.
    Claim {
        reverse_swap: ReverseSwap,
        #[serde(with = "hex::serde")]
        preimage: [u8; 32],
    },
    SwapExpired {
        swap: Swap,
        is_native_asset: bool,
    },
    ReverseSwapExpired {
        reverse_swap: ReverseSwap,
        is_native_asset: bool,
    },
}

impl NurseryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NurseryEvent::LockupFailed { .. } => "lockup.failed",
            NurseryEvent::ContractLockup { contract, .. } => match contract {
                ContractVariant::Native => "native.lockup",
                ContractVariant::Token => "token.lockup",
            },
            NurseryEvent::ReverseLockupMempool { .. } => "lockup.mempool",
            NurseryEvent::LockupConfirmed { .. } => "lockup.confirmed",
            NurseryEvent::LockupFailedToSend { .. } => "lockup.failedToSend",
            NurseryEvent::Claim { .. } => "claim",
            NurseryEvent::SwapExpired { .. } => "swap.expired",
            NurseryEvent::ReverseSwapExpired { .. } => "reverseSwap.expired",
        }
    }

    /// Id of the swap or reverse swap the event is about.
    pub fn record_id(&self) -> &str {
        match self {
            NurseryEvent::LockupFailed { swap, .. }
            | NurseryEvent::ContractLockup { swap, .. }
            | NurseryEvent::SwapExpired { swap, .. } => &swap.id,
            NurseryEvent::ReverseLockupMempool { reverse_swap, .. }
            | NurseryEvent::LockupConfirmed { reverse_swap, .. }
            | NurseryEvent::LockupFailedToSend { reverse_swap, .. }
            | NurseryEvent::Claim { reverse_swap, .. }
            | NurseryEvent::ReverseSwapExpired { reverse_swap, .. } => &reverse_swap.id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<NurseryEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<NurseryEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
