use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Decimals of the base unit swap records are denominated in.
pub const BASE_UNIT_DECIMALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Native,
    Token,
}

/// Converts a chain's native fixed-point amounts to the 10^8 base unit
/// stored on swap records. Every amount comparison goes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Units {
    pub decimals: u32,
}

impl Units {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Native amount to base units, truncating sub-base-unit dust.
    pub fn normalize(&self, native: u128) -> Result<u64> {
        let scaled = if self.decimals >= BASE_UNIT_DECIMALS {
            native / pow10(self.decimals - BASE_UNIT_DECIMALS)?
        } else {
            native
                .checked_mul(pow10(BASE_UNIT_DECIMALS - self.decimals)?)
                .with_context(|| format!("amount overflow: {native}"))?
        };
        u64::try_from(scaled).with_context(|| format!("amount exceeds u64 base units: {scaled}"))
    }
}

fn pow10(exp: u32) -> Result<u128> {
    10u128
        .checked_pow(exp)
        .with_context(|| format!("decimals out of range: 10^{exp}"))
}

/// What the nursery needs to know about one currency it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub symbol: String,
    pub chain: String,
    pub kind: WalletKind,
    /// The service's own claim identity on this chain.
    pub claim_address: String,
    #[serde(default)]
    pub token_address: Option<String>,
    pub decimals: u32,
}

impl WalletInfo {
    pub fn units(&self) -> Units {
        Units::new(self.decimals)
    }

    pub fn is_native(&self) -> bool {
        self.kind == WalletKind::Native
    }
}

/// Read-mostly symbol to wallet table shared by every chain nursery.
#[derive(Debug, Clone, Default)]
pub struct WalletRegistry {
    wallets: HashMap<String, WalletInfo>,
}

impl WalletRegistry {
    pub fn new(wallets: impl IntoIterator<Item = WalletInfo>) -> Result<Self> {
        let mut map = HashMap::new();
        for wallet in wallets {
            if wallet.kind == WalletKind::Token {
                anyhow::ensure!(
                    wallet.token_address.is_some(),
                    "token wallet {} needs a token_address",
                    wallet.symbol
                );
            }
            let symbol = wallet.symbol.clone();
            anyhow::ensure!(
                map.insert(symbol.clone(), wallet).is_none(),
                "duplicate wallet symbol {symbol}"
            );
        }
        Ok(Self { wallets: map })
    }

    /// Loads a JSON array of [`WalletInfo`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read wallets file {}", path.display()))?;
        let wallets: Vec<WalletInfo> = serde_json::from_str(&raw)
            .with_context(|| format!("parse wallets file {}", path.display()))?;
        Self::new(wallets)
    }

    pub fn resolve(&self, symbol: &str) -> Option<&WalletInfo> {
        self.wallets.get(symbol)
    }

    /// Like [`resolve`](Self::resolve) but only for wallets settled on `chain`.
    pub fn resolve_on_chain(&self, symbol: &str, chain: &str) -> Option<&WalletInfo> {
        self.resolve(symbol).filter(|w| w.chain == chain)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context as _;

    use super::*;

    fn wallet(symbol: &str, kind: WalletKind, token_address: Option<&str>) -> WalletInfo {
        WalletInfo {
            symbol: symbol.to_string(),
            chain: "rsk".to_string(),
            kind,
            claim_address: "0xservice".to_string(),
            token_address: token_address.map(str::to_string),
            decimals: 18,
        }
    }

    #[test]
    fn wei_normalizes_to_base_units() -> Result<()> {
        let units = Units::new(18);
        assert_eq!(units.normalize(5_000_000_000_000_000)?, 500_000);
        // Dust below one base unit is truncated.
        assert_eq!(units.normalize(9_999_999_999)?, 0);
        Ok(())
    }

    #[test]
    fn fewer_decimals_scale_up() -> Result<()> {
        let units = Units::new(6);
        assert_eq!(units.normalize(1_500_000)?, 150_000_000);
        assert_eq!(Units::new(BASE_UNIT_DECIMALS).normalize(42)?, 42);
        Ok(())
    }

    #[test]
    fn oversized_amount_is_an_error() {
        assert!(Units::new(8).normalize(u128::from(u64::MAX) + 1).is_err());
    }

    #[test]
    fn registry_checks_wallets() -> Result<()> {
        let registry = WalletRegistry::new([
            wallet("RBTC", WalletKind::Native, None),
            wallet("USDT", WalletKind::Token, Some("0xtoken")),
        ])?;
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve_on_chain("RBTC", "rsk").is_some());
        assert!(registry.resolve_on_chain("RBTC", "bitcoin").is_none());

        let err = WalletRegistry::new([wallet("USDT", WalletKind::Token, None)]).unwrap_err();
        assert!(err.to_string().contains("needs a token_address"));

        let err = WalletRegistry::new([
            wallet("RBTC", WalletKind::Native, None),
            wallet("RBTC", WalletKind::Native, None),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate wallet symbol"));
        Ok(())
    }

    #[test]
    fn wallets_file_parses() -> Result<()> {
        let raw = r#"[
  {"symbol": "RBTC", "chain": "rsk", "kind": "native", "claim_address": "0xservice", "decimals": 18},
  {"symbol": "USDT", "chain": "rsk", "kind": "token", "claim_address": "0xservice", "token_address": "0xtoken", "decimals": 18}
]"#;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wallets.json");
        std::fs::write(&path, raw)?;

        let registry = WalletRegistry::load(&path)?;
        let usdt = registry.resolve("USDT").context("USDT missing")?;
        assert!(!usdt.is_native());
        assert_eq!(usdt.token_address.as_deref(), Some("0xtoken"));
        Ok(())
    }
}
