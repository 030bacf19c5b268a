use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use serde::Serialize;
use swap_nursery::swap::store::SqliteStore;
use swap_nursery::swap::{ReverseSwapFilter, ReverseSwapStatus, SwapFilter, SwapStatus};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long)]
    store_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    ListSwaps {
        /// e.g. `transaction.mempool`
        #[arg(long)]
        status: Option<SwapStatus>,
    },
    ListReverseSwaps {
        #[arg(long)]
        status: Option<ReverseSwapStatus>,
    },
    GetSwap {
        #[arg(long)]
        id: String,
    },
    GetReverseSwap {
        #[arg(long)]
        id: String,
    },
    /// Swaps whose lockup was rejected and that wait in `transaction.mempool`
    /// until their timelock expires.
    Stuck,
}

fn main() -> Result<()> {
    swap_nursery::logging::init().ok();

    let args = Args::parse();
    anyhow::ensure!(
        args.store_path.exists(),
        "swap store not found: {}",
        args.store_path.display()
    );
    let store = SqliteStore::open(args.store_path).context("open sqlite store")?;

    match args.command {
        Command::ListSwaps { status } => {
            let mut filter = SwapFilter::new();
            if let Some(status) = status {
                filter = filter.status_in(&[status]);
            }
            print_json(&store.select_swaps(&filter, None)?)?;
        }
        Command::ListReverseSwaps { status } => {
            let mut filter = ReverseSwapFilter::new();
            if let Some(status) = status {
                filter = filter.status_in(&[status]);
            }
            print_json(&store.select_reverse_swaps(&filter, None)?)?;
        }
        Command::GetSwap { id } => {
            let swap = store
                .get_swap(&id)?
                .with_context(|| format!("swap not found: {id}"))?;
            print_json(&swap)?;
        }
        Command::GetReverseSwap { id } => {
            let reverse_swap = store
                .get_reverse_swap(&id)?
                .with_context(|| format!("reverse swap not found: {id}"))?;
            print_json(&reverse_swap)?;
        }
        Command::Stuck => {
            let stuck: Vec<_> = store
                .select_swaps(
                    &SwapFilter::new().status_in(&[SwapStatus::TransactionMempool]),
                    None,
                )?
                .into_iter()
                .filter(|swap| swap.failure_reason.is_some())
                .collect();
            print_json(&stuck)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("encode json")?
    );
    Ok(())
}
