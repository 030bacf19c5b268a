use anyhow::{Context as _, Result};

use super::{ChainNursery, NurseryEvent};
use crate::chain::TransactionProvider;
use crate::swap::store::SwapRepository;
use crate::swap::{
    ReverseSwapFilter, ReverseSwapStatus, ReverseSwapUpdate, SwapFilter, SwapStatus, SwapUpdate,
};

impl<R, P> ChainNursery<R, P>
where
    R: SwapRepository + 'static,
    P: TransactionProvider + 'static,
{
    /// Expires every swap and reverse swap on this chain whose timelock is at
    /// or below `height`.
    pub async fn handle_block(&self, height: u32) {
        let (swaps, reverse_swaps) = tokio::join!(
            self.expire_swaps(height),
            self.expire_reverse_swaps(height)
        );

        if let Err(err) = swaps {
            tracing::warn!(height, error = %format!("{err:#}"), "swap expiry scan failed");
        }
        if let Err(err) = reverse_swaps {
            tracing::warn!(
                height,
                error = %format!("{err:#}"),
                "reverse swap expiry scan failed"
            );
        }
    }

    async fn expire_swaps(&self, height: u32) -> Result<()> {
        let swaps = self
            .repo
            .find_swaps(
                &SwapFilter::new()
                    .status_in(&SwapStatus::expirable())
                    .timeout_at_or_below(height),
            )
            .await
            .context("find expirable swaps")?;

        for swap in swaps {
            let Some(wallet) = self
                .wallets
                .resolve_on_chain(swap.chain_currency(), &self.cfg.chain_id)
            else {
                continue;
            };
            let is_native_asset = wallet.is_native();

            let swap = match self
                .repo
                .update_swap(
                    &swap,
                    SwapUpdate {
                        status: Some(SwapStatus::Expired),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(swap) => swap,
                Err(err) => {
                    tracing::warn!(
                        swap_id = %swap.id,
                        height,
                        error = %format!("{err:#}"),
                        "could not expire swap"
                    );
                    continue;
                }
            };

            tracing::info!(
                swap_id = %swap.id,
                height,
                timeout_block_height = swap.timeout_block_height,
                "swap expired"
            );
            self.emit(NurseryEvent::SwapExpired {
                swap,
                is_native_asset,
            });
        }

        Ok(())
    }

    async fn expire_reverse_swaps(&self, height: u32) -> Result<()> {
        let reverse_swaps = self
            .repo
            .find_reverse_swaps(
                &ReverseSwapFilter::new()
                    .status_in(&ReverseSwapStatus::expirable())
                    .timeout_at_or_below(height),
            )
            .await
            .context("find expirable reverse swaps")?;

        for reverse_swap in reverse_swaps {
            let Some(wallet) = self
                .wallets
                .resolve_on_chain(reverse_swap.chain_currency(), &self.cfg.chain_id)
            else {
                continue;
            };
            let is_native_asset = wallet.is_native();

            let reverse_swap = match self
                .repo
                .update_reverse_swap(
                    &reverse_swap,
                    ReverseSwapUpdate {
                        status: Some(ReverseSwapStatus::Expired),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(reverse_swap) => reverse_swap,
                Err(err) => {
                    tracing::warn!(
                        reverse_swap_id = %reverse_swap.id,
                        height,
                        error = %format!("{err:#}"),
                        "could not expire reverse swap"
                    );
                    continue;
                }
            };

            tracing::info!(
                reverse_swap_id = %reverse_swap.id,
                height,
                timeout_block_height = reverse_swap.timeout_block_height,
                "reverse swap expired"
            );
            self.emit(NurseryEvent::ReverseSwapExpired {
                reverse_swap,
                is_native_asset,
            });
        }

        Ok(())
    }
}
