use serde::Serialize;

/// Lockup parameters agreed at swap creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedLockup<'a> {
    pub claim_address: &'a str,
    pub timelock: u32,
    /// Minimum amount in base units, if the swap has one.
    pub expected_amount: Option<u64>,
    /// Set only for token contracts.
    pub token_address: Option<&'a str>,
}

/// What the contract event actually carried, amount already normalized to
/// base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLockup<'a> {
    pub claim_address: &'a str,
    pub timelock: u32,
    pub amount: u64,
    pub token_address: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockupRejection {
    #[error("invalid claim address {observed}, expected {expected}")]
    InvalidClaimAddress { observed: String, expected: String },
    #[error("invalid timelock {observed}, expected {expected}")]
    InvalidTimelock { observed: u32, expected: u32 },
    #[error("locked token {} is not {expected}", observed.as_deref().unwrap_or("none"))]
    InvalidTokenLocked {
        observed: Option<String>,
        expected: String,
    },
    #[error("insufficient amount locked {observed}, expected at least {expected}")]
    InsufficientAmount { observed: u64, expected: u64 },
}

impl LockupRejection {
    pub fn code(&self) -> &'static str {
        match self {
            LockupRejection::InvalidClaimAddress { .. } => "INVALID_CLAIM_ADDRESS",
            LockupRejection::InvalidTimelock { .. } => "INVALID_TIMELOCK",
            LockupRejection::InvalidTokenLocked { .. } => "INVALID_TOKEN_LOCKED",
            LockupRejection::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
        }
    }
}

/// Checks claim address, timelock, token and amount in that order and
/// reports the first mismatch.
pub fn validate_lockup(
    expected: &ExpectedLockup<'_>,
    observed: &ObservedLockup<'_>,
) -> Result<(), LockupRejection> {
    if !same_address(observed.claim_address, expected.claim_address) {
        return Err(LockupRejection::InvalidClaimAddress {
            observed: observed.claim_address.to_string(),
            expected: expected.claim_address.to_string(),
        });
    }

    if observed.timelock != expected.timelock {
        return Err(LockupRejection::InvalidTimelock {
            observed: observed.timelock,
            expected: expected.timelock,
        });
    }

    if let Some(token) = expected.token_address {
        let matches = observed
            .token_address
            .is_some_and(|observed| same_address(observed, token));
        if !matches {
            return Err(LockupRejection::InvalidTokenLocked {
                observed: observed.token_address.map(str::to_string),
                expected: token.to_string(),
            });
        }
    }

    if let Some(min) = expected.expected_amount
        && observed.amount < min
    {
        return Err(LockupRejection::InsufficientAmount {
            observed: observed.amount,
            expected: min,
        });
    }

    Ok(())
}

// Hex addresses differ only in checksum casing.
fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
