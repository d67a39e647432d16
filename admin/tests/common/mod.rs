//! In-memory oracle program for integration tests.
//!
//! `MockChain` answers `OracleRpc` reads from an `AccountGraph` and executes
//! sent transactions against it, so a plan can be submitted and re-planned.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use oracle_types::{
    AccountGraph, MappingAccount, PriceAccount, PriceComponent, ProductAccount, MAPPING_PRODUCT_LIMIT,
    PRICE_ACCOUNT_SIZE,
};
use program_admin::fetch::{FetchError, OracleRpc};
use program_admin::instructions::OracleInstruction;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::{AccountMeta, Instruction, InstructionError},
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::{Transaction, TransactionError},
};

/// Applies one instruction to `graph` the way the oracle program would.
pub fn apply(graph: &mut AccountGraph, program: &Pubkey, ix: &Instruction) -> Result<(), InstructionError> {
    let key = |i: usize| ix.accounts[i].pubkey;
    if ix.program_id == system_program::id() {
        graph.uninitialized.insert(key(1));
        return Ok(());
    }
    if ix.program_id != *program {
        return Ok(());
    }
    match OracleInstruction::unpack(&ix.data).expect("oracle instruction") {
        OracleInstruction::InitMapping => {
            let mapping = key(1);
            graph.uninitialized.remove(&mapping);
            graph.mappings.insert(
                mapping,
                MappingAccount { key: mapping, next_mapping_key: Pubkey::default(), product_keys: vec![] },
            );
        }
        OracleInstruction::AddMapping => {
            let (tail, mapping) = (key(1), key(2));
            // the program only links a successor to a full tail
            let t = graph.mappings.get_mut(&tail).ok_or(InstructionError::InvalidArgument)?;
            if t.product_keys.len() < MAPPING_PRODUCT_LIMIT {
                return Err(InstructionError::InvalidArgument);
            }
            t.next_mapping_key = mapping;
            graph.uninitialized.remove(&mapping);
            graph.mappings.insert(
                mapping,
                MappingAccount { key: mapping, next_mapping_key: Pubkey::default(), product_keys: vec![] },
            );
        }
        OracleInstruction::AddProduct => {
            let (mapping, product) = (key(1), key(2));
            let m = graph.mappings.get_mut(&mapping).ok_or(InstructionError::InvalidArgument)?;
            if m.product_keys.len() >= MAPPING_PRODUCT_LIMIT {
                return Err(InstructionError::InvalidArgument);
            }
            m.product_keys.push(product);
            graph.uninitialized.remove(&product);
            graph.products.insert(
                product,
                ProductAccount { key: product, first_price_key: Pubkey::default(), metadata: Default::default() },
            );
        }
        OracleInstruction::UpdateProduct { metadata } => {
            if let Some(p) = graph.products.get_mut(&key(1)) {
                p.metadata = metadata;
            }
        }
        OracleInstruction::AddPrice { exponent, price_type } => {
            let (product, price) = (key(1), key(2));
            graph.uninitialized.remove(&price);
            let next_price_key = graph.products.get(&product).map(|p| p.first_price_key).unwrap_or_default();
            if let Some(p) = graph.products.get_mut(&product) {
                p.first_price_key = price;
            }
            graph.prices.insert(
                price,
                PriceAccount {
                    key: price,
                    price_type,
                    exponent,
                    component_count: 0,
                    min_publishers: 0,
                    product_key: product,
                    next_price_key,
                    components: vec![],
                },
            );
        }
        OracleInstruction::AddPublisher { publisher } => {
            if let Some(p) = graph.prices.get_mut(&key(1)) {
                p.components.push(PriceComponent { publisher_key: publisher, is_enabled: true });
                p.component_count = p.components.len() as u32;
            }
        }
        OracleInstruction::DelPublisher { publisher } => {
            if let Some(p) = graph.prices.get_mut(&key(1)) {
                p.components.retain(|c| c.publisher_key != publisher);
                p.component_count = p.components.len() as u32;
            }
        }
        OracleInstruction::SetMinPublishers { min_publishers } => {
            if let Some(p) = graph.prices.get_mut(&key(1)) {
                p.min_publishers = min_publishers;
            }
        }
        OracleInstruction::DelPrice => {
            let (product, price) = (key(1), key(2));
            if let Some(removed) = graph.prices.remove(&price) {
                if let Some(p) = graph.products.get_mut(&product) {
                    p.first_price_key = removed.next_price_key;
                }
            }
        }
        OracleInstruction::DelProduct => {
            let (mapping, product) = (key(1), key(2));
            if let Some(m) = graph.mappings.get_mut(&mapping) {
                m.product_keys.retain(|k| *k != product);
            }
            graph.products.remove(&product);
        }
    }
    Ok(())
}

fn owned(program: Pubkey, data: Vec<u8>) -> Account {
    Account { lamports: 1, data, owner: program, executable: false, rent_epoch: 0 }
}

pub struct MockChain {
    pub program: Pubkey,
    pub graph: Mutex<AccountGraph>,
    pub sent: Mutex<Vec<Transaction>>,
    statuses: Mutex<HashMap<Signature, Result<(), TransactionError>>>,
    /// Transactions writing this account fail on chain.
    pub fail_touching: Mutex<Option<Pubkey>>,
    /// Sent transactions never reach the requested commitment.
    pub stall: AtomicBool,
    /// Number of upcoming `get_latest_blockhash` calls that fail.
    pub blockhash_failures: AtomicUsize,
}

impl MockChain {
    pub fn new(program: Pubkey, graph: AccountGraph) -> Self {
        Self {
            program,
            graph: Mutex::new(graph),
            sent: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            fail_touching: Mutex::new(None),
            stall: AtomicBool::new(false),
            blockhash_failures: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> AccountGraph {
        self.graph.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn account_data(&self, key: &Pubkey) -> Option<Vec<u8>> {
        let graph = self.graph.lock().unwrap();
        if let Some(m) = graph.mappings.get(key) {
            return Some(m.to_bytes());
        }
        if let Some(p) = graph.products.get(key) {
            return Some(p.to_bytes().expect("product fits"));
        }
        if let Some(p) = graph.prices.get(key) {
            return Some(p.to_bytes());
        }
        graph.uninitialized.contains(key).then(|| vec![0u8; PRICE_ACCOUNT_SIZE])
    }

    fn all_keys(&self) -> Vec<Pubkey> {
        let graph = self.graph.lock().unwrap();
        graph
            .mappings
            .keys()
            .chain(graph.products.keys())
            .chain(graph.prices.keys())
            .chain(graph.uninitialized.iter())
            .copied()
            .collect()
    }
}

fn decompile(tx: &Transaction) -> Vec<Instruction> {
    let keys = &tx.message.account_keys;
    tx.message
        .instructions
        .iter()
        .map(|ci| Instruction {
            program_id: keys[ci.program_id_index as usize],
            accounts: ci
                .accounts
                .iter()
                .map(|&i| AccountMeta::new(keys[i as usize], tx.message.is_signer(i as usize)))
                .collect(),
            data: ci.data.clone(),
        })
        .collect()
}

#[async_trait]
impl OracleRpc for MockChain {
    async fn get_program_accounts(&self, program_key: &Pubkey) -> Result<Vec<(Pubkey, Account)>, FetchError> {
        Ok(self
            .all_keys()
            .into_iter()
            .filter_map(|k| self.account_data(&k).map(|d| (k, owned(*program_key, d))))
            .collect())
    }

    async fn get_account_info(&self, key: &Pubkey) -> Result<Option<Account>, FetchError> {
        Ok(self.account_data(key).map(|d| owned(self.program, d)))
    }

    async fn get_latest_blockhash(&self, _commitment: CommitmentConfig) -> Result<Hash, FetchError> {
        let failing = self.blockhash_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(FetchError::Rpc("blockhash unavailable".to_string()));
        }
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, FetchError> {
        tx.verify().map_err(|e| FetchError::Rpc(format!("signature verification: {e}")))?;
        let signature = tx.signatures[0];
        let ixs = decompile(tx);

        let poisoned = *self.fail_touching.lock().unwrap();
        let touches = |k: &Pubkey| ixs.iter().any(|ix| ix.accounts.iter().any(|m| m.pubkey == *k));
        let status = match poisoned {
            Some(k) if touches(&k) => Err(TransactionError::AccountInUse),
            _ => {
                // all or nothing, like a real transaction
                let mut graph = self.graph.lock().unwrap();
                let mut next = graph.clone();
                let applied = ixs.iter().enumerate().try_for_each(|(i, ix)| {
                    apply(&mut next, &self.program, ix).map_err(|e| TransactionError::InstructionError(i as u8, e))
                });
                if applied.is_ok() {
                    *graph = next;
                }
                applied
            }
        };
        self.sent.lock().unwrap().push(tx.clone());
        self.statuses.lock().unwrap().insert(signature, status);
        Ok(signature)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        _commitment: CommitmentConfig,
    ) -> Result<Option<Result<(), TransactionError>>, FetchError> {
        if self.stall.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.statuses.lock().unwrap().get(signature).cloned())
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, FetchError> {
        Ok(data_len as u64 * 7)
    }
}
