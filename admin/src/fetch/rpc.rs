//! `OracleRpc` over the nonblocking Solana `RpcClient`.
//
// Reads use the client's configured commitment; callers pick the level when
// constructing the client (`RpcClient::new_with_commitment`).

use std::time::Instant;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};

use crate::fetch::{FetchError, OracleRpc};

#[async_trait]
impl OracleRpc for RpcClient {
    async fn get_program_accounts(&self, program_key: &Pubkey) -> Result<Vec<(Pubkey, Account)>, FetchError> {
        let started = Instant::now();
        let accounts = RpcClient::get_program_accounts(self, program_key)
            .await
            .map_err(|e| FetchError::Rpc(format!("get_program_accounts: {e}")))?;
        tracing::info!(
            target: "fetch",
            program = %program_key,
            count = accounts.len(),
            "get_program_accounts took {:?}",
            started.elapsed()
        );
        Ok(accounts)
    }

    async fn get_account_info(&self, key: &Pubkey) -> Result<Option<Account>, FetchError> {
        let resp = self
            .get_account_with_commitment(key, self.commitment())
            .await
            .map_err(|e| FetchError::Rpc(format!("get_account_info({key}): {e}")))?;
        Ok(resp.value)
    }

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> Result<Hash, FetchError> {
        let (hash, _last_valid_height) = self
            .get_latest_blockhash_with_commitment(commitment)
            .await
            .map_err(|e| FetchError::Rpc(format!("get_latest_blockhash: {e}")))?;
        Ok(hash)
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, FetchError> {
        let started = Instant::now();
        let sig = RpcClient::send_transaction(self, tx)
            .await
            .map_err(|e| FetchError::Rpc(format!("send_transaction: {e}")))?;
        tracing::debug!(target: "sender", %sig, "send_transaction took {:?}", started.elapsed());
        Ok(sig)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<Option<Result<(), TransactionError>>, FetchError> {
        self.get_signature_status_with_commitment(signature, commitment)
            .await
            .map_err(|e| FetchError::Rpc(format!("get_signature_status({signature}): {e}")))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, FetchError> {
        RpcClient::get_minimum_balance_for_rent_exemption(self, data_len)
            .await
            .map_err(|e| FetchError::Rpc(format!("get_minimum_balance_for_rent_exemption({data_len}): {e}")))
    }
}
