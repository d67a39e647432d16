//! Reconciliation of the on-chain account graph against the reference configuration.
//!
//! `plan_sync` is a pure pass over two snapshots (the fetched `AccountGraph`
//! and the resolved reference) that produces an ordered `SyncPlan`:
//!
//! 1. mapping phase: make sure the mapping list has room for every new product
//! 2. product phase: create missing products, update drifted metadata
//! 3. price phase: create missing price accounts, toggle publishers, set the
//!    minimum publisher count
//!
//! Later steps may reference accounts created by earlier ones. Problems local
//! to one product are recorded as `PlanIssue`s and never stop the others; only a
//! corrupt mapping list aborts the pass.

mod mapping;
mod price;
mod product;

use std::collections::BTreeSet;
use std::fmt;

use oracle_types::{AccountGraph, ReferencePermissions, ReferenceProducts, ReferencePublishers};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use crate::keys::{account_label, KeyStore, KeyStoreError, FUNDING_LABEL};
use crate::linked_list::StructuralError;

/// Lamports needed to make each account kind rent exempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RentExemption {
    pub mapping: u64,
    pub product: u64,
    pub price: u64,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub program_key: Pubkey,
    pub funding_key: Pubkey,
    /// Allow new keypairs for mapping / product / price accounts.
    pub generate_keys: bool,
    pub rent: RentExemption,
}

/// Reference configuration with network overrides already applied.
#[derive(Debug, Clone, Copy)]
pub struct Reference<'a> {
    pub products: &'a ReferenceProducts,
    pub publishers: &'a ReferencePublishers,
    pub permissions: &'a ReferencePermissions,
}

/// Instructions that must land in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub label: String,
    pub jump_symbol: Option<String>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRef {
    pub label: String,
    pub key: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Keypair absent and generation disabled.
    MissingKey,
    /// No mapping room, or too many publishers for one price account.
    Capacity,
    /// Metadata does not fit the product account encoding.
    Encoding,
    UnknownPublisher,
    /// Key store and chain disagree about which account holds a symbol.
    KeyMismatch,
    /// A referenced account is missing from the snapshot.
    MissingAccount,
    /// On-chain product with no reference entry; left untouched.
    Unreferenced,
    KeyStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanIssue {
    pub kind: IssueKind,
    pub jump_symbol: Option<String>,
    pub account: Option<Pubkey>,
    pub message: String,
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(s) = &self.jump_symbol {
            write!(f, " [{s}]")?;
        }
        if let Some(k) = &self.account {
            write!(f, " ({k})")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub steps: Vec<PlannedStep>,
    /// Every key that signs some step, funding first, in order of first use.
    pub signers: Vec<SignerRef>,
    pub issues: Vec<PlanIssue>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.steps.iter().flat_map(|s| s.instructions.iter())
    }

    pub fn instruction_count(&self) -> usize {
        self.steps.iter().map(|s| s.instructions.len()).sum()
    }

    pub fn signer_keys(&self) -> Vec<Pubkey> {
        self.signers.iter().map(|s| s.key).collect()
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &PlanIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error("key store: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// Computes the steps that bring the chain in line with `reference`.
pub fn plan_sync(
    graph: &AccountGraph,
    reference: Reference<'_>,
    opts: &SyncOptions,
    keys: &dyn KeyStore,
) -> Result<SyncPlan, SyncError> {
    let mut planner = Planner::new(graph, reference, opts, keys);

    planner.load_mappings()?;
    let targets = planner.classify_products();
    let placed = planner.plan_products(&targets);
    planner.plan_prices(&placed);
    planner.report_unreferenced();

    let plan = planner.plan;
    tracing::info!(
        target: "sync",
        steps = plan.steps.len(),
        instructions = plan.instruction_count(),
        signers = plan.signers.len(),
        issues = plan.issues.len(),
        "sync plan ready"
    );
    Ok(plan)
}

/// A mapping account that can still take products.
#[derive(Debug, Clone, Copy)]
struct MappingSlot {
    key: Pubkey,
    free: usize,
    /// Unknown until a product first lands here.
    can_sign: Option<bool>,
}

/// Where each reference product stands before any step is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProductTarget {
    /// Initialized on chain.
    Existing(Pubkey),
    /// Keypair on file; account allocated but never initialized.
    Allocated(Pubkey),
    /// Keypair on file; nothing on chain.
    Known(Pubkey),
    /// Needs a fresh keypair.
    Generate,
}


/// Product key per jump symbol after the product phase, and whether this plan creates it.
#[derive(Debug, Clone, Copy)]
struct PlacedProduct {
    key: Pubkey,
    created: bool,
}

struct Planner<'a> {
    graph: &'a AccountGraph,
    reference: Reference<'a>,
    opts: &'a SyncOptions,
    keys: &'a dyn KeyStore,
    plan: SyncPlan,
    slots: Vec<MappingSlot>,
    mapping_tail: Option<Pubkey>,
    mapping_count: usize,
    mappings_exhausted: bool,
    signer_set: BTreeSet<Pubkey>,
}

impl<'a> Planner<'a> {
    fn new(graph: &'a AccountGraph, reference: Reference<'a>, opts: &'a SyncOptions, keys: &'a dyn KeyStore) -> Self {
        let mut planner = Self {
            graph,
            reference,
            opts,
            keys,
            plan: SyncPlan::default(),
            slots: Vec::new(),
            mapping_tail: None,
            mapping_count: 0,
            mappings_exhausted: false,
            signer_set: BTreeSet::new(),
        };
        planner.add_signer(FUNDING_LABEL.to_string(), opts.funding_key);
        planner
    }

    fn add_signer(&mut self, label: String, key: Pubkey) {
        if self.signer_set.insert(key) {
            self.plan.signers.push(SignerRef { label, key });
        }
    }

    fn push_step(&mut self, label: String, jump_symbol: Option<&str>, instructions: Vec<Instruction>) {
        tracing::info!(target: "sync", step = %label, instructions = instructions.len(), "planned");
        self.plan.steps.push(PlannedStep {
            label,
            jump_symbol: jump_symbol.map(str::to_string),
            instructions,
        });
    }

    fn issue(&mut self, kind: IssueKind, jump_symbol: Option<&str>, account: Option<Pubkey>, message: String) {
        let issue = PlanIssue { kind, jump_symbol: jump_symbol.map(str::to_string), account, message };
        if kind == IssueKind::Unreferenced {
            tracing::warn!(target: "sync", "{issue}");
        } else {
            tracing::warn!(target: "sync", "{issue}; skipped");
        }
        self.plan.issues.push(issue);
    }

    /// Registers an existing account as a signer if its keypair is on file.
    fn require_signer(&mut self, key: Pubkey, jump_symbol: Option<&str>, what: &str) -> bool {
        if self.signer_set.contains(&key) {
            return true;
        }
        match self.keys.has_key(&key) {
            Ok(true) => {
                self.add_signer(account_label(&key), key);
                true
            }
            Ok(false) => {
                self.issue(
                    IssueKind::MissingKey,
                    jump_symbol,
                    Some(key),
                    format!("no keypair for {what}; restore links or import the key"),
                );
                false
            }
            Err(e) => {
                self.issue(IssueKind::KeyStore, jump_symbol, Some(key), format!("{what}: {e}"));
                false
            }
        }
    }

    /// `label`'s key, generating one when allowed. Records an issue when unavailable.
    fn resolve_key(&mut self, label: &str, jump_symbol: Option<&str>, generate: bool) -> Option<Pubkey> {
        match self.keys.resolve(label, generate) {
            Ok(Some(k)) => {
                self.add_signer(label.to_string(), k);
                Some(k)
            }
            Ok(None) => {
                self.issue(
                    IssueKind::MissingKey,
                    jump_symbol,
                    None,
                    format!("no keypair `{label}` and key generation is disabled"),
                );
                None
            }
            Err(e) => {
                self.issue(IssueKind::KeyStore, jump_symbol, None, format!("`{label}`: {e}"));
                None
            }
        }
    }

    fn report_unreferenced(&mut self) {
        let known: BTreeSet<&str> = self.reference.products.values().map(|p| p.symbol.as_str()).collect();
        let graph = self.graph;
        for product in graph.products.values() {
            let symbol = product.symbol().unwrap_or("<no symbol>");
            if !known.contains(symbol) {
                self.issue(
                    IssueKind::Unreferenced,
                    None,
                    Some(product.key),
                    format!("on-chain product {symbol} is not in the reference products"),
                );
            }
        }
    }
}
