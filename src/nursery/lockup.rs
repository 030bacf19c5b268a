use anyhow::{Context as _, Result};

use super::{ChainNursery, NurseryEvent};
use crate::chain::{ContractVariant, LockupValues, TransactionProvider};
use crate::nursery::validator::{ExpectedLockup, ObservedLockup, validate_lockup};
use crate::swap::store::SwapRepository;
use crate::swap::{ReverseSwapFilter, ReverseSwapStatus, SwapFilter, SwapStatus, SwapUpdate};

impl<R, P> ChainNursery<R, P>
where
    R: SwapRepository + 'static,
    P: TransactionProvider + 'static,
{
    /// A swap contract logged a lockup. A swap still waiting for its lockup
    /// is validated and recorded as `transaction.mempool` either way; anything
    /// else falls through to the reverse swap path.
    pub async fn handle_lockup(
        &self,
        contract: ContractVariant,
        transaction_hash: &str,
        transaction_vout: Option<u32>,
        fee: u128,
        values: &LockupValues,
    ) -> Result<()> {
        let preimage_hash = hex::encode(values.preimage_hash);

        let swap = self
            .repo
            .find_one_swap(
                &SwapFilter::new()
                    .preimage_hash(&preimage_hash)
                    .status_in(&SwapStatus::AWAITING_LOCKUP),
            )
            .await
            .context("find swap for lockup")?;
        let Some(swap) = swap else {
            return self
                .handle_reverse_lockup(contract, transaction_hash, transaction_vout, fee, values)
                .await;
        };

        let Some(wallet) = self.wallet_for(swap.chain_currency(), contract) else {
            tracing::debug!(
                swap_id = %swap.id,
                chain_currency = swap.chain_currency(),
                contract = contract.as_str(),
                "lockup is for a swap settled elsewhere"
            );
            return Ok(());
        };

        let units = wallet.units();
        // An amount past u64 base units is recorded without `onchain_amount`
        // and counts as more than enough.
        let amount = match units.normalize(values.amount) {
            Ok(amount) => Some(amount),
            Err(err) => {
                tracing::warn!(
                    swap_id = %swap.id,
                    %transaction_hash,
                    error = %format!("{err:#}"),
                    "lockup amount out of range"
                );
                None
            }
        };
        let fee = match units.normalize(fee) {
            Ok(fee) => fee,
            Err(err) => {
                tracing::warn!(
                    swap_id = %swap.id,
                    %transaction_hash,
                    error = %format!("{err:#}"),
                    "lockup fee out of range; not accounted"
                );
                0
            }
        };

        let expected = ExpectedLockup {
            claim_address: &wallet.claim_address,
            timelock: swap.timeout_block_height,
            expected_amount: swap.expected_amount,
            token_address: match contract {
                ContractVariant::Native => None,
                ContractVariant::Token => wallet.token_address.as_deref(),
            },
        };
        let observed = ObservedLockup {
            claim_address: &values.claim_address,
            timelock: values.timelock,
            amount: amount.unwrap_or(u64::MAX),
            token_address: values.token_address.as_deref(),
        };
        let verdict = validate_lockup(&expected, &observed);

        // The lockup is recorded whatever the verdict, in one write.
        let swap = self
            .repo
            .update_swap(
                &swap,
                SwapUpdate {
                    status: Some(SwapStatus::TransactionMempool),
                    lockup_transaction_id: Some(transaction_hash.to_string()),
                    lockup_transaction_vout: transaction_vout,
                    onchain_amount: amount,
                    add_miner_fee: Some(fee),
                    failure_reason: verdict.as_ref().err().map(ToString::to_string),
                },
            )
            .await
            .context("record lockup transaction")?;
        tracing::info!(
            swap_id = %swap.id,
            %transaction_hash,
            amount = ?amount,
            "swap lockup found in mempool"
        );

        match verdict {
            Ok(()) => {
                tracing::info!(swap_id = %swap.id, %transaction_hash, "swap lockup accepted");
                self.emit(NurseryEvent::ContractLockup {
                    contract,
                    swap,
                    transaction_hash: transaction_hash.to_string(),
                    values: values.clone(),
                });
            }
            Err(reason) => {
                tracing::warn!(
                    swap_id = %swap.id,
                    %transaction_hash,
                    code = reason.code(),
                    %reason,
                    "swap lockup rejected"
                );
                self.emit(NurseryEvent::LockupFailed { swap, reason });
            }
        }

        Ok(())
    }

    /// The user claimed a reverse swap lockup and revealed the preimage.
    pub async fn handle_claim(
        &self,
        contract: ContractVariant,
        transaction_hash: &str,
        preimage_hash: &[u8; 32],
        preimage: &[u8; 32],
    ) -> Result<()> {
        let reverse_swap = self
            .repo
            .find_one_reverse_swap(
                &ReverseSwapFilter::new()
                    .preimage_hash(hex::encode(preimage_hash))
                    .status_not_in(&[ReverseSwapStatus::InvoiceSettled]),
            )
            .await
            .context("find reverse swap for claim")?;
        let Some(reverse_swap) = reverse_swap else {
            tracing::debug!(
                %transaction_hash,
                contract = contract.as_str(),
                "claim matches no open reverse swap"
            );
            return Ok(());
        };

        tracing::info!(
            reverse_swap_id = %reverse_swap.id,
            %transaction_hash,
            "reverse swap claimed"
        );
        self.emit(NurseryEvent::Claim {
            reverse_swap,
            preimage: *preimage,
        });
        Ok(())
    }
}
