//! The operations behind each CLI command.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use oracle_types::{
    parse_overrides_json, parse_permissions_json, parse_products_json, parse_publishers_json, read_reference_file,
    AccountGraph, ProductMetadata, ReferenceOverrides, ReferencePermissions, ReferenceProducts, ReferencePublishers,
    MAPPING_ACCOUNT_SIZE, PRICE_ACCOUNT_SIZE, PRODUCT_ACCOUNT_SIZE,
};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signer::Signer};

use crate::chunking::batch_steps;
use crate::config::AdminConfig;
use crate::fetch::{fetch_account_graph, with_retries, OracleRpc};
use crate::instructions;
use crate::keys::{account_label, mapping_label, price_label, product_label, KeyStore, FUNDING_LABEL};
use crate::linked_list::order_mapping_keys;
use crate::permissions;
use crate::sender::{CancelFlag, SignerPool, SubmitReport, Submitter};
use crate::serializer::emit_dry_run;
use crate::sync::{plan_sync, PlannedStep, Reference, RentExemption, SignerRef, SyncOptions, SyncPlan};

/// Reference files of one sync run, with network overrides applied.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub products: ReferenceProducts,
    pub publishers: ReferencePublishers,
    pub permissions: ReferencePermissions,
}

impl ReferenceData {
    pub fn load(
        products: &Path,
        publishers: &Path,
        permissions: &Path,
        overrides: Option<&Path>,
        network: &str,
    ) -> Result<Self> {
        let products = parse_products_json(&read_reference_file(products)?)?;
        let publishers = parse_publishers_json(&read_reference_file(publishers)?)?;
        let raw_permissions = parse_permissions_json(&read_reference_file(permissions)?)?;
        let overrides = match overrides {
            Some(path) => parse_overrides_json(&read_reference_file(path)?)?,
            None => ReferenceOverrides::new(),
        };
        Ok(Self {
            products,
            publishers,
            permissions: permissions::resolve(&raw_permissions, &overrides, network),
        })
    }

    pub fn as_reference(&self) -> Reference<'_> {
        Reference { products: &self.products, publishers: &self.publishers, permissions: &self.permissions }
    }
}

/// Result of `sync`: the plan, and the submission report when it was sent.
#[derive(Debug)]
pub struct SyncOutcome {
    pub plan: SyncPlan,
    pub report: Option<SubmitReport>,
}

pub struct ProgramAdmin<R> {
    rpc: R,
    config: AdminConfig,
    keys: Arc<dyn KeyStore>,
}

impl<R: OracleRpc> ProgramAdmin<R> {
    pub fn new(rpc: R, config: AdminConfig, keys: Arc<dyn KeyStore>) -> Self {
        Self { rpc, config, keys }
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub async fn refresh(&self) -> Result<AccountGraph> {
        fetch_account_graph(&self.rpc, &self.config.program_key, &self.config.fetch)
            .await
            .context("fetching program accounts")
    }

    pub async fn rent_exemption(&self) -> Result<RentExemption> {
        let cfg = &self.config.fetch;
        let rent = move |size: usize| {
            with_retries(cfg, "get_minimum_balance_for_rent_exemption", move || {
                self.rpc.get_minimum_balance_for_rent_exemption(size)
            })
        };
        let (mapping, product, price) =
            tokio::try_join!(rent(MAPPING_ACCOUNT_SIZE), rent(PRODUCT_ACCOUNT_SIZE), rent(PRICE_ACCOUNT_SIZE))
                .context("fetching rent exemption")?;
        Ok(RentExemption { mapping, product, price })
    }

    fn funding_key(&self) -> Result<Pubkey> {
        let kp = self.keys.load_keypair(FUNDING_LABEL).context("loading funding keypair")?;
        Ok(kp.pubkey())
    }

    /// Reconciles the program with `reference`, then prints or submits the plan.
    pub async fn sync(&self, reference: &ReferenceData, cancel: CancelFlag) -> Result<SyncOutcome> {
        let funding = self.funding_key()?;
        let graph = self.refresh().await?;
        let rent = self.rent_exemption().await?;
        let opts = SyncOptions {
            program_key: self.config.program_key,
            funding_key: funding,
            generate_keys: self.config.generate_keys,
            rent,
        };
        let plan = plan_sync(&graph, reference.as_reference(), &opts, self.keys.as_ref())?;

        if plan.is_empty() {
            tracing::info!(target: "sync", issues = plan.issues.len(), "program is in sync");
            return Ok(SyncOutcome { plan, report: None });
        }
        if !self.config.send_transactions {
            let ixs: Vec<Instruction> = plan.instructions().cloned().collect();
            emit_dry_run(&ixs, self.config.outfile.as_deref())?;
            return Ok(SyncOutcome { plan, report: None });
        }

        let report = self.submit_steps(&plan.steps, &plan.signers, &funding, cancel).await?;
        Ok(SyncOutcome { plan, report: Some(report) })
    }

    async fn submit_steps(
        &self,
        steps: &[PlannedStep],
        signers: &[SignerRef],
        funding: &Pubkey,
        cancel: CancelFlag,
    ) -> Result<SubmitReport> {
        let pool = SignerPool::load(self.keys.as_ref(), signers).context("loading signer keypairs")?;
        let submit_cfg = self.config.submit_config();
        let batches = batch_steps(steps, funding, pool.keys(), &submit_cfg.budget)?;
        tracing::info!(target: "sender", steps = steps.len(), batches = batches.len(), "submitting");
        let submitter = Submitter::new(&self.rpc, &pool, submit_cfg, cancel);
        Ok(submitter.submit(&batches, funding).await)
    }

    /// Sends one step signed by funding and the accounts it names.
    async fn send_single(
        &self,
        label: &str,
        ix: Instruction,
        funding: Pubkey,
        accounts: &[Pubkey],
        cancel: CancelFlag,
    ) -> Result<SubmitReport> {
        if !self.config.send_transactions {
            emit_dry_run(std::slice::from_ref(&ix), self.config.outfile.as_deref())?;
            return Ok(SubmitReport::default());
        }
        let mut signers = vec![SignerRef { label: FUNDING_LABEL.to_string(), key: funding }];
        signers.extend(accounts.iter().map(|k| SignerRef { label: account_label(k), key: *k }));
        let step = PlannedStep { label: label.to_string(), jump_symbol: None, instructions: vec![ix] };
        self.submit_steps(std::slice::from_ref(&step), &signers, &funding, cancel).await
    }

    pub async fn delete_price(&self, product: Pubkey, price: Pubkey, cancel: CancelFlag) -> Result<SubmitReport> {
        let funding = self.funding_key()?;
        let ix = instructions::delete_price(&self.config.program_key, &funding, &product, &price);
        self.send_single("delete price", ix, funding, &[product, price], cancel).await
    }

    pub async fn delete_product(&self, mapping: Pubkey, product: Pubkey, cancel: CancelFlag) -> Result<SubmitReport> {
        let funding = self.funding_key()?;
        let ix = instructions::delete_product(&self.config.program_key, &funding, &mapping, &product);
        self.send_single("delete product", ix, funding, &[mapping, product], cancel).await
    }

    /// Proposes `new_authority` as upgrade authority; the funding key must be the current one.
    pub async fn migrate_upgrade_authority(&self, new_authority: Pubkey, cancel: CancelFlag) -> Result<SubmitReport> {
        let funding = self.funding_key()?;
        let ix = instructions::propose_upgrade_authority(&funding, &new_authority, &self.config.program_key);
        self.send_single("propose upgrade authority", ix, funding, &[], cancel).await
    }

    pub async fn list_accounts(&self, publishers: &ReferencePublishers) -> Result<String> {
        let graph = self.refresh().await?;
        render_account_tree(&graph, publishers)
    }

    /// Recreates `mapping_N`, `product_<jump>` and `price_<jump>` links from the chain.
    pub async fn restore_links(&self, products: &ReferenceProducts) -> Result<usize> {
        let graph = self.refresh().await?;
        restore_links(&graph, products, self.keys.as_ref())
    }
}

/// Text tree: mapping → product symbol → price exponent → publishers.
pub fn render_account_tree(graph: &AccountGraph, publishers: &ReferencePublishers) -> Result<String> {
    let chain = order_mapping_keys(graph.mappings.values())?;
    if chain.is_empty() {
        bail!("program has no mapping accounts");
    }

    let mut out = String::new();
    for mapping_key in &chain {
        let Some(mapping) = graph.mappings.get(mapping_key) else { continue };
        writeln!(out, "Mapping: {mapping_key}")?;
        for product_key in &mapping.product_keys {
            let Some(product) = graph.products.get(product_key) else {
                writeln!(out, "  Product: ??? ({product_key})")?;
                continue;
            };
            writeln!(out, "  Product: {}", product.symbol().unwrap_or("???"))?;
            if !product.has_price() {
                continue;
            }
            let Some(price) = graph.prices.get(&product.first_price_key) else {
                writeln!(out, "    Price: ??? ({})", product.first_price_key)?;
                continue;
            };
            writeln!(out, "    Price: {} exponent ({} components)", price.exponent, price.component_count)?;
            for c in &price.components {
                writeln!(out, "      Publisher: {}", publishers.display(&c.publisher_key))?;
            }
        }
    }
    Ok(out)
}

pub fn restore_links(graph: &AccountGraph, products: &ReferenceProducts, keys: &dyn KeyStore) -> Result<usize> {
    let chain = order_mapping_keys(graph.mappings.values())?;
    if chain.is_empty() {
        bail!("program has no mapping accounts");
    }
    let jump_by_symbol: BTreeMap<&str, &str> =
        products.values().map(|p| (p.symbol.as_str(), p.jump_symbol.as_str())).collect();

    let mut restored = 0;
    let mut link = |key: &Pubkey, label: String| match keys.restore_symlink(key, &label) {
        Ok(()) => restored += 1,
        Err(e) => tracing::warn!(target: "keys", %key, %label, error = %e, "link not restored"),
    };

    for (n, mapping_key) in chain.iter().enumerate() {
        link(mapping_key, mapping_label(n));
        let Some(mapping) = graph.mappings.get(mapping_key) else { continue };
        for product_key in &mapping.product_keys {
            let Some(product) = graph.products.get(product_key) else { continue };
            let Some(jump) = product.symbol().and_then(|s| jump_by_symbol.get(s)) else {
                tracing::warn!(target: "keys", %product_key, "product not in reference products; left unlinked");
                continue;
            };
            link(product_key, product_label(jump));
            if product.has_price() {
                link(&product.first_price_key, price_label(jump));
            }
        }
    }
    tracing::info!(target: "keys", restored, "links restored");
    Ok(restored)
}

/// `toggle-publisher`: prints the instruction instead of sending it.
pub fn toggle_publisher_json(
    program: &Pubkey,
    funding: &Pubkey,
    price: &Pubkey,
    publisher: &Pubkey,
    enable: bool,
    outfile: Option<&Path>,
) -> Result<String> {
    let ix = instructions::toggle_publisher(program, funding, price, publisher, enable);
    emit_dry_run(&[ix], outfile)
}

/// `set-minimum-publishers`: prints the instruction instead of sending it.
pub fn set_minimum_publishers_json(
    program: &Pubkey,
    funding: &Pubkey,
    price: &Pubkey,
    value: u8,
    outfile: Option<&Path>,
) -> Result<String> {
    let ix = instructions::set_minimum_publishers(program, funding, price, value);
    emit_dry_run(&[ix], outfile)
}

/// `update-product-metadata`: `metadata` is a JSON object, kept in its key order.
pub fn update_product_metadata_json(
    program: &Pubkey,
    funding: &Pubkey,
    product: &Pubkey,
    metadata: &str,
    outfile: Option<&Path>,
) -> Result<String> {
    let metadata: ProductMetadata = serde_json::from_str(metadata).context("parsing product metadata")?;
    let ix = instructions::update_product(program, funding, product, &metadata)?;
    emit_dry_run(&[ix], outfile)
}
