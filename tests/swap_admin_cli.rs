mod support;

use anyhow::{Context as _, Result};
use assert_cmd::Command;
use predicates::prelude::*;
use swap_nursery::swap::store::SqliteStore;
use swap_nursery::swap::{ReverseSwapStatus, Swap, SwapStatus};

use support::fixtures::{rbtc_reverse_swap, rbtc_swap};

fn seeded_store(dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let path = dir.join("swaps.sqlite3");
    let store = SqliteStore::open(path.clone()).context("open sqlite store")?;
    store.insert_swap(&rbtc_swap("swap-created", 1, SwapStatus::Created, 1000))?;
    store.insert_swap(&Swap {
        lockup_transaction_id: Some("0xstuck".to_string()),
        failure_reason: Some("insufficient amount locked 1, expected at least 1000000".to_string()),
        ..rbtc_swap("swap-stuck", 2, SwapStatus::TransactionMempool, 1000)
    })?;
    store.insert_swap(&rbtc_swap("swap-mempool", 3, SwapStatus::TransactionMempool, 1000))?;
    store.insert_reverse_swap(&rbtc_reverse_swap(
        "reverse-a",
        4,
        ReverseSwapStatus::Created,
        2000,
    ))?;
    Ok(path)
}

#[test]
fn list_swaps_filters_by_status() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = seeded_store(dir.path())?;

    Command::cargo_bin("swap-admin")?
        .arg("--store-path")
        .arg(&path)
        .args(["list-swaps", "--status", "swap.created"])
        .assert()
        .success()
        .stdout(predicate::str::contains("swap-created"))
        .stdout(predicate::str::contains("swap-stuck").not());

    Command::cargo_bin("swap-admin")?
        .arg("--store-path")
        .arg(&path)
        .args(["list-swaps", "--status", "swap.bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown swap status"));

    Ok(())
}

#[test]
fn stuck_lists_only_rejected_lockups() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = seeded_store(dir.path())?;

    let out = Command::cargo_bin("swap-admin")?
        .arg("--store-path")
        .arg(&path)
        .arg("stuck")
        .output()?;
    assert!(out.status.success());

    let swaps: Vec<Swap> = serde_json::from_slice(&out.stdout).context("parse stuck output")?;
    let ids: Vec<_> = swaps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["swap-stuck"]);
    assert_eq!(swaps[0].status, SwapStatus::TransactionMempool);

    Ok(())
}

#[test]
fn get_reverse_swap_prints_record_or_fails() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = seeded_store(dir.path())?;

    Command::cargo_bin("swap-admin")?
        .arg("--store-path")
        .arg(&path)
        .args(["get-reverse-swap", "--id", "reverse-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"swap.created\""));

    Command::cargo_bin("swap-admin")?
        .arg("--store-path")
        .arg(&path)
        .args(["get-swap", "--id", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("swap not found: nope"));

    Ok(())
}
