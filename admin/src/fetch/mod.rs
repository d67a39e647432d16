//! Account graph refresh for the oracle program.
//!
//! Responsibilities:
//! - Abstract the RPC surface the admin tool needs behind `OracleRpc`
//! - List every account owned by the program and parse it into an `AccountGraph`
//! - Fan out point lookups for keys the listing referenced but did not return
//! - Retry idempotent reads with exponential backoff
//!
//! Sends are deliberately not part of the retry path; see `sender`.

pub mod rpc;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use oracle_types::{AccountGraph, OracleAccount};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};

/// RPC surface used by the admin tool. Implemented for the nonblocking
/// `RpcClient` in [`rpc`]; tests plug in in-memory backends.
#[async_trait]
pub trait OracleRpc: Send + Sync {
    async fn get_program_accounts(&self, program_key: &Pubkey) -> Result<Vec<(Pubkey, Account)>, FetchError>;

    async fn get_account_info(&self, key: &Pubkey) -> Result<Option<Account>, FetchError>;

    async fn get_latest_blockhash(&self, commitment: CommitmentConfig) -> Result<Hash, FetchError>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, FetchError>;

    /// `None` while the signature is unknown or below `commitment`.
    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<Option<Result<(), TransactionError>>, FetchError>;

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("{what} failed after {attempts} attempts: {last}")]
    RetriesExhausted { what: String, attempts: usize, last: String },
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of attempts per read.
    pub max_retries: usize,
    /// Base backoff duration in milliseconds (exponential backoff).
    pub backoff_ms: u64,
    /// Point lookups in flight at once.
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 4, // 1 initial + 3 retries
            backoff_ms: 80, // 80ms, then 160ms, 320ms
            concurrency: 16,
        }
    }
}

/// Runs an idempotent read, retrying transient failures with backoff.
pub async fn with_retries<T, F, Fut>(cfg: &FetchConfig, what: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0usize;
    let mut backoff_ms = cfg.backoff_ms;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries.max(1) => {
                return Err(FetchError::RetriesExhausted {
                    what: what.to_string(),
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(target: "fetch", what, attempt, error = %e, "read failed; retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2);
            }
        }
    }
}

/// Concurrent point lookups. Absent accounts are simply missing from the result.
pub async fn fetch_accounts<R>(
    rpc: &R,
    keys: &[Pubkey],
    cfg: &FetchConfig,
) -> Result<Vec<(Pubkey, Account)>, FetchError>
where
    R: OracleRpc + ?Sized,
{
    let results: Vec<Result<Option<(Pubkey, Account)>, FetchError>> = stream::iter(keys.iter().copied())
        .map(|key| async move {
            let what = format!("get_account_info({key})");
            let acc = with_retries(cfg, &what, || rpc.get_account_info(&key)).await?;
            Ok(acc.map(|a| (key, a)))
        })
        .buffer_unordered(cfg.concurrency.max(1))
        .collect()
        .await;

    let mut out = Vec::with_capacity(results.len());
    for r in results {
        if let Some(found) = r? {
            out.push(found);
        }
    }
    out.sort_by_key(|(k, _)| *k);
    Ok(out)
}

fn ingest(graph: &mut AccountGraph, program_key: &Pubkey, key: Pubkey, account: &Account) {
    if account.owner != *program_key {
        tracing::warn!(target: "fetch", %key, owner = %account.owner, "account not owned by program; ignored");
        return;
    }
    match OracleAccount::parse(key, &account.data) {
        Ok(parsed) => graph.insert(parsed),
        Err(e) => tracing::warn!(target: "fetch", %key, error = %e, "unparseable account ignored"),
    }
}

/// Fresh snapshot of every oracle account owned by `program_key`.
pub async fn fetch_account_graph<R>(
    rpc: &R,
    program_key: &Pubkey,
    cfg: &FetchConfig,
) -> Result<AccountGraph, FetchError>
where
    R: OracleRpc + ?Sized,
{
    let listed = with_retries(cfg, "get_program_accounts", || rpc.get_program_accounts(program_key)).await?;

    let mut graph = AccountGraph::default();
    for (key, account) in &listed {
        ingest(&mut graph, program_key, *key, account);
    }

    // Listings can lag behind point reads right after accounts are created.
    let dangling: Vec<Pubkey> = graph.dangling_keys().into_iter().collect();
    if !dangling.is_empty() {
        tracing::info!(target: "fetch", count = dangling.len(), "fetching referenced accounts missing from listing");
        for (key, account) in fetch_accounts(rpc, &dangling, cfg).await? {
            ingest(&mut graph, program_key, key, &account);
        }
        for key in graph.dangling_keys() {
            tracing::warn!(target: "fetch", %key, "referenced account does not exist");
        }
    }

    tracing::info!(
        target: "fetch",
        mappings = graph.mappings.len(),
        products = graph.products.len(),
        prices = graph.prices.len(),
        uninitialized = graph.uninitialized.len(),
        "account graph refreshed"
    );
    Ok(graph)
}
