use anyhow::{Context as _, Result};

use super::retry::lookup_with_timeout;
use super::{ChainNursery, NurseryEvent};
use crate::chain::{
    ContractVariant, LockupValues, TransactionHandle, TransactionLookup, TransactionProvider,
};
use crate::swap::store::SwapRepository;
use crate::swap::{ReverseSwap, ReverseSwapFilter, ReverseSwapStatus, ReverseSwapUpdate};

impl<R, P> ChainNursery<R, P>
where
    R: SwapRepository + 'static,
    P: TransactionProvider + 'static,
{
    /// Re-attaches confirmation watchers to reverse swap lockups that were
    /// still unconfirmed when the process stopped.
    pub async fn init(&self) -> Result<()> {
        let pending = self
            .repo
            .find_reverse_swaps(
                &ReverseSwapFilter::new().status_in(&[ReverseSwapStatus::TransactionMempool]),
            )
            .await
            .context("find pending reverse swap lockups")?;

        let mut recovered = 0usize;
        for reverse_swap in pending {
            if self
                .wallets
                .resolve_on_chain(reverse_swap.chain_currency(), &self.cfg.chain_id)
                .is_none()
            {
                continue;
            }

            let Some(transaction_id) = reverse_swap.transaction_id.clone() else {
                tracing::warn!(
                    reverse_swap_id = %reverse_swap.id,
                    "pending reverse swap has no lockup transaction id"
                );
                continue;
            };

            self.watch_lockup(reverse_swap, transaction_id).await;
            recovered += 1;
        }

        tracing::info!(chain = %self.cfg.chain_id, recovered, "reverse swap recovery done");
        Ok(())
    }

    /// Waits for `handle` to confirm and records the outcome on the reverse
    /// swap. Runs on a tracked background task.
    pub fn listen_contract_transaction(&self, reverse_swap: ReverseSwap, handle: TransactionHandle) {
        tracing::debug!(
            reverse_swap_id = %reverse_swap.id,
            transaction_id = %handle.id,
            "watching reverse swap lockup"
        );

        let nursery = self.clone();
        self.spawn_task(async move {
            let id = reverse_swap.id.clone();
            if let Err(err) = nursery.await_lockup_confirmation(reverse_swap, handle).await {
                tracing::warn!(
                    reverse_swap_id = %id,
                    error = %format!("{err:#}"),
                    "reverse swap lockup watcher failed"
                );
            }
        });
    }

    /// The service's own lockup for a reverse swap reached the mempool.
    pub(super) async fn handle_reverse_lockup(
        &self,
        contract: ContractVariant,
        transaction_hash: &str,
        transaction_vout: Option<u32>,
        fee: u128,
        values: &LockupValues,
    ) -> Result<()> {
        let reverse_swap = self
            .repo
            .find_one_reverse_swap(
                &ReverseSwapFilter::new()
                    .preimage_hash(hex::encode(values.preimage_hash))
                    .status_in(&ReverseSwapStatus::AWAITING_LOCKUP),
            )
            .await
            .context("find reverse swap for lockup")?;
        let Some(reverse_swap) = reverse_swap else {
            tracing::debug!(%transaction_hash, "lockup matches no swap awaiting one");
            return Ok(());
        };

        let Some(wallet) = self.wallet_for(reverse_swap.chain_currency(), contract) else {
            tracing::debug!(
                reverse_swap_id = %reverse_swap.id,
                contract = contract.as_str(),
                "lockup is for a reverse swap settled elsewhere"
            );
            return Ok(());
        };
        let fee = wallet
            .units()
            .normalize(fee)
            .context("normalize lockup fee")?;

        let reverse_swap = self
            .repo
            .update_reverse_swap(
                &reverse_swap,
                ReverseSwapUpdate {
                    status: Some(ReverseSwapStatus::TransactionMempool),
                    transaction_id: Some(transaction_hash.to_string()),
                    transaction_vout,
                    add_miner_fee: Some(fee),
                    ..Default::default()
                },
            )
            .await
            .context("record reverse swap lockup")?;
        tracing::info!(
            reverse_swap_id = %reverse_swap.id,
            %transaction_hash,
            "reverse swap lockup found in mempool"
        );
        self.emit(NurseryEvent::ReverseLockupMempool {
            reverse_swap: reverse_swap.clone(),
            transaction_hash: transaction_hash.to_string(),
        });

        self.watch_lockup(reverse_swap, transaction_hash.to_string())
            .await;
        Ok(())
    }

    /// Looks the lockup up and attaches a watcher. A transient lookup failure
    /// hands over to a background retry; a definite miss is final.
    async fn watch_lockup(&self, reverse_swap: ReverseSwap, transaction_id: String) {
        let lookup =
            lookup_with_timeout(&*self.chain, &transaction_id, self.cfg.lookup_retry.timeout).await;
        match lookup {
            TransactionLookup::Found(handle) => {
                self.listen_contract_transaction(reverse_swap, handle);
            }
            TransactionLookup::DefinitelyAbsent => {
                tracing::warn!(
                    reverse_swap_id = %reverse_swap.id,
                    %transaction_id,
                    "reverse swap lockup not known to the chain; not watching it"
                );
            }
            TransactionLookup::TransientFailure(reason) => {
                tracing::warn!(
                    reverse_swap_id = %reverse_swap.id,
                    %transaction_id,
                    %reason,
                    "reverse swap lockup lookup failed; retrying in background"
                );
                let nursery = self.clone();
                self.spawn_task(async move {
                    nursery.retry_lockup_lookup(reverse_swap, transaction_id).await;
                });
            }
        }
    }

    async fn retry_lockup_lookup(&self, reverse_swap: ReverseSwap, transaction_id: String) {
        let retry = &self.cfg.lookup_retry;
        let mut attempt = 0usize;
        loop {
            if let Some(max_retries) = retry.max_retries
                && attempt >= max_retries
            {
                tracing::error!(
                    reverse_swap_id = %reverse_swap.id,
                    %transaction_id,
                    attempts = attempt,
                    "giving up on reverse swap lockup lookup; unmonitored until restart"
                );
                return;
            }

            tokio::time::sleep(retry.backoff(attempt)).await;
            attempt += 1;

            match lookup_with_timeout(&*self.chain, &transaction_id, retry.timeout).await {
                TransactionLookup::Found(handle) => {
                    tracing::info!(
                        reverse_swap_id = %reverse_swap.id,
                        %transaction_id,
                        attempt,
                        "reverse swap lockup lookup recovered"
                    );
                    self.listen_contract_transaction(reverse_swap, handle);
                    return;
                }
                TransactionLookup::DefinitelyAbsent => {
                    tracing::warn!(
                        reverse_swap_id = %reverse_swap.id,
                        %transaction_id,
                        "reverse swap lockup not known to the chain; not watching it"
                    );
                    return;
                }
                TransactionLookup::TransientFailure(reason) => {
                    tracing::debug!(
                        reverse_swap_id = %reverse_swap.id,
                        attempt,
                        %reason,
                        "reverse swap lockup lookup still failing"
                    );
                }
            }
        }
    }

    async fn await_lockup_confirmation(
        &self,
        reverse_swap: ReverseSwap,
        handle: TransactionHandle,
    ) -> Result<()> {
        let outcome = self
            .chain
            .await_confirmations(&handle, self.cfg.required_confirmations)
            .await;

        // The wait can be long; write against the record as it is now.
        let current = self
            .repo
            .find_one_reverse_swap(
                &ReverseSwapFilter::new().preimage_hash(&reverse_swap.preimage_hash),
            )
            .await
            .context("reload reverse swap")?
            .with_context(|| format!("reverse swap not found: {}", reverse_swap.id))?;
        if current.status != ReverseSwapStatus::TransactionMempool {
            tracing::debug!(
                reverse_swap_id = %current.id,
                status = %current.status,
                "reverse swap moved on while awaiting confirmation"
            );
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                let reverse_swap = self
                    .repo
                    .update_reverse_swap(
                        &current,
                        ReverseSwapUpdate {
                            status: Some(ReverseSwapStatus::TransactionConfirmed),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("record lockup confirmation")?;
                tracing::info!(
                    reverse_swap_id = %reverse_swap.id,
                    transaction_id = %handle.id,
                    "reverse swap lockup confirmed"
                );
                self.emit(NurseryEvent::LockupConfirmed {
                    reverse_swap,
                    transaction_hash: handle.id,
                });
            }
            Err(err) => {
                let reason = err.to_string();
                let reverse_swap = self
                    .repo
                    .update_reverse_swap(
                        &current,
                        ReverseSwapUpdate {
                            status: Some(ReverseSwapStatus::TransactionFailed),
                            failure_reason: Some(reason.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("record lockup failure")?;
                tracing::warn!(
                    reverse_swap_id = %reverse_swap.id,
                    transaction_id = %handle.id,
                    %reason,
                    "reverse swap lockup failed to confirm"
                );
                self.emit(NurseryEvent::LockupFailedToSend {
                    reverse_swap,
                    reason,
                });
            }
        }

        Ok(())
    }
}
