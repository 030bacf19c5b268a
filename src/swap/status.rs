use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a normal (on-chain to Lightning) swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapStatus {
    #[serde(rename = "swap.created")]
    Created,
    #[serde(rename = "invoice.set")]
    InvoiceSet,
    #[serde(rename = "transaction.mempool")]
    TransactionMempool,
    #[serde(rename = "transaction.confirmed")]
    TransactionConfirmed,
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
    #[serde(rename = "invoice.failedToPay")]
    InvoiceFailedToPay,
    #[serde(rename = "transaction.claimed")]
    TransactionClaimed,
    #[serde(rename = "swap.expired")]
    Expired,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 8] = [
        SwapStatus::Created,
        SwapStatus::InvoiceSet,
        SwapStatus::TransactionMempool,
        SwapStatus::TransactionConfirmed,
        SwapStatus::InvoicePaid,
        SwapStatus::InvoiceFailedToPay,
        SwapStatus::TransactionClaimed,
        SwapStatus::Expired,
    ];

    /// Statuses in which a swap is still waiting for its lockup.
    pub const AWAITING_LOCKUP: [SwapStatus; 2] = [SwapStatus::Created, SwapStatus::InvoiceSet];

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Created => "swap.created",
            SwapStatus::InvoiceSet => "invoice.set",
            SwapStatus::TransactionMempool => "transaction.mempool",
            SwapStatus::TransactionConfirmed => "transaction.confirmed",
            SwapStatus::InvoicePaid => "invoice.paid",
            SwapStatus::InvoiceFailedToPay => "invoice.failedToPay",
            SwapStatus::TransactionClaimed => "transaction.claimed",
            SwapStatus::Expired => "swap.expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::TransactionClaimed | SwapStatus::InvoiceFailedToPay | SwapStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        use SwapStatus::*;

        matches!(
            (self, next),
            (Created, InvoiceSet | TransactionMempool | Expired)
                | (InvoiceSet, TransactionMempool | Expired)
                | (
                    TransactionMempool,
                    TransactionConfirmed | InvoicePaid | InvoiceFailedToPay | Expired
                )
                | (TransactionConfirmed, InvoicePaid | InvoiceFailedToPay | Expired)
                | (InvoicePaid, TransactionClaimed)
        )
    }

    /// Statuses the expiry scanner may move to `swap.expired`.
    pub fn expirable() -> Vec<SwapStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(SwapStatus::Expired))
            .collect()
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown swap status: {s}"))
    }
}

/// Lifecycle of a reverse (Lightning to on-chain) swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReverseSwapStatus {
    #[serde(rename = "swap.created")]
    Created,
    #[serde(rename = "minerfee.paid")]
    MinerFeePaid,
    #[serde(rename = "transaction.mempool")]
    TransactionMempool,
    #[serde(rename = "transaction.confirmed")]
    TransactionConfirmed,
    #[serde(rename = "invoice.settled")]
    InvoiceSettled,
    #[serde(rename = "transaction.failed")]
    TransactionFailed,
    #[serde(rename = "transaction.refunded")]
    TransactionRefunded,
    #[serde(rename = "swap.expired")]
    Expired,
    #[serde(rename = "invoice.expired")]
    InvoiceExpired,
}

impl ReverseSwapStatus {
    pub const ALL: [ReverseSwapStatus; 9] = [
        ReverseSwapStatus::Created,
        ReverseSwapStatus::MinerFeePaid,
        ReverseSwapStatus::TransactionMempool,
        ReverseSwapStatus::TransactionConfirmed,
        ReverseSwapStatus::InvoiceSettled,
        ReverseSwapStatus::TransactionFailed,
        ReverseSwapStatus::TransactionRefunded,
        ReverseSwapStatus::Expired,
        ReverseSwapStatus::InvoiceExpired,
    ];

    /// Statuses in which the service has not broadcast its lockup yet.
    pub const AWAITING_LOCKUP: [ReverseSwapStatus; 2] =
        [ReverseSwapStatus::Created, ReverseSwapStatus::MinerFeePaid];

    pub fn as_str(self) -> &'static str {
        match self {
            ReverseSwapStatus::Created => "swap.created",
            ReverseSwapStatus::MinerFeePaid => "minerfee.paid",
            ReverseSwapStatus::TransactionMempool => "transaction.mempool",
            ReverseSwapStatus::TransactionConfirmed => "transaction.confirmed",
            ReverseSwapStatus::InvoiceSettled => "invoice.settled",
            ReverseSwapStatus::TransactionFailed => "transaction.failed",
            ReverseSwapStatus::TransactionRefunded => "transaction.refunded",
            ReverseSwapStatus::Expired => "swap.expired",
            ReverseSwapStatus::InvoiceExpired => "invoice.expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReverseSwapStatus::InvoiceSettled
                | ReverseSwapStatus::TransactionFailed
                | ReverseSwapStatus::TransactionRefunded
                | ReverseSwapStatus::InvoiceExpired
        )
    }

    pub fn can_transition_to(self, next: ReverseSwapStatus) -> bool {
        use ReverseSwapStatus::*;

        matches!(
            (self, next),
            (
                Created,
                MinerFeePaid | TransactionMempool | TransactionFailed | Expired | InvoiceExpired
            ) | (
                MinerFeePaid,
                TransactionMempool | TransactionFailed | Expired | InvoiceExpired
            ) | (
                TransactionMempool,
                TransactionConfirmed | TransactionFailed | InvoiceSettled
            ) | (TransactionConfirmed, InvoiceSettled | Expired)
                | (Expired, TransactionRefunded)
        )
    }

    /// Statuses the expiry scanner may move to `swap.expired`. Never includes
    /// `transaction.mempool`.
    pub fn expirable() -> Vec<ReverseSwapStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(ReverseSwapStatus::Expired))
            .collect()
    }
}

impl fmt::Display for ReverseSwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReverseSwapStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown reverse swap status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for status in SwapStatus::ALL {
            assert_eq!(status.as_str().parse::<SwapStatus>().ok(), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        for status in ReverseSwapStatus::ALL {
            assert_eq!(
                status.as_str().parse::<ReverseSwapStatus>().ok(),
                Some(status)
            );
        }
        assert!("transaction.lost".parse::<SwapStatus>().is_err());
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in SwapStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(SwapStatus::ALL.into_iter().all(|to| !from.can_transition_to(to)));
        }
        for from in ReverseSwapStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
        {
            assert!(
                ReverseSwapStatus::ALL
                    .into_iter()
                    .all(|to| !from.can_transition_to(to))
            );
        }
    }

    #[test]
    fn expirable_statuses() {
        assert_eq!(
            SwapStatus::expirable(),
            vec![
                SwapStatus::Created,
                SwapStatus::InvoiceSet,
                SwapStatus::TransactionMempool,
                SwapStatus::TransactionConfirmed,
            ]
        );
        assert_eq!(
            ReverseSwapStatus::expirable(),
            vec![
                ReverseSwapStatus::Created,
                ReverseSwapStatus::MinerFeePaid,
                ReverseSwapStatus::TransactionConfirmed,
            ]
        );
        assert!(!SwapStatus::InvoicePaid.can_transition_to(SwapStatus::Expired));
        assert!(ReverseSwapStatus::Expired.can_transition_to(ReverseSwapStatus::TransactionRefunded));
    }
}
