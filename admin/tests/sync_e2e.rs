//! Sync against an in-memory program: build from scratch, converge, stay converged.

mod common;

use std::sync::Arc;

use common::MockChain;
use oracle_types::{
    AccountGraph, MappingAccount, ProductMetadata, ReferenceOverrides, ReferencePermissions, ReferenceProduct,
    ReferenceProducts, ReferencePublishers, MAPPING_PRODUCT_LIMIT, PRICE_ACCOUNT_TYPE,
};
use program_admin::{
    commands::{ProgramAdmin, ReferenceData},
    config::AdminConfig,
    fetch::FetchConfig,
    instructions::{OracleInstruction, AUTHORITY_ESCROW_PROGRAM_ID},
    keys::{FsKeyStore, KeyStore, MemoryKeyStore, FUNDING_LABEL},
    permissions,
    sender::CancelFlag,
};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};

struct Fixture {
    keys: Arc<MemoryKeyStore>,
    funding: Pubkey,
    pub1: Pubkey,
    pub2: Pubkey,
    products: ReferenceProducts,
    publishers: ReferencePublishers,
}

fn product(jump: &str, symbol: &str, min_publishers: Option<u8>) -> ReferenceProduct {
    let metadata: ProductMetadata =
        [("symbol", symbol), ("asset_type", "Crypto"), ("quote_currency", "USD")].into_iter().collect();
    ReferenceProduct { jump_symbol: jump.into(), symbol: symbol.into(), exponent: -8, metadata, min_publishers }
}

impl Fixture {
    fn new() -> Self {
        let keys = Arc::new(MemoryKeyStore::new());
        let funding = keys.insert(FUNDING_LABEL, Keypair::new());
        let (pub1, pub2) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut publishers = ReferencePublishers::default();
        publishers.insert("pub1", pub1);
        publishers.insert("pub2", pub2);

        let mut products = ReferenceProducts::new();
        products.insert("BTCUSD".into(), product("BTCUSD", "Crypto.BTC/USD", Some(1)));
        products.insert("ETHUSD".into(), product("ETHUSD", "Crypto.ETH/USD", None));
        Self { keys, funding, pub1, pub2, products, publishers }
    }

    fn reference(&self, btc: &[&str], eth: &[&str], overrides: &str) -> ReferenceData {
        let mut raw = ReferencePermissions::new();
        for (jump, names) in [("BTCUSD", btc), ("ETHUSD", eth)] {
            raw.entry(jump.into())
                .or_default()
                .insert(PRICE_ACCOUNT_TYPE.into(), names.iter().map(|n| n.to_string()).collect());
        }
        let overrides: ReferenceOverrides = serde_json::from_str(overrides).unwrap();
        ReferenceData {
            products: self.products.clone(),
            publishers: self.publishers.clone(),
            permissions: permissions::resolve(&raw, &overrides, "devnet"),
        }
    }

    fn admin(&self, chain: MockChain, send: bool) -> ProgramAdmin<MockChain> {
        self.admin_with(chain, |cfg| cfg.send_transactions = send)
    }

    fn admin_with(&self, chain: MockChain, tweak: impl FnOnce(&mut AdminConfig)) -> ProgramAdmin<MockChain> {
        let mut cfg = AdminConfig::new("devnet", None, chain.program, "unused").unwrap();
        cfg.generate_keys = true;
        cfg.fetch = FetchConfig { max_retries: 1, backoff_ms: 1, concurrency: 4 };
        tweak(&mut cfg);
        let store: Arc<dyn KeyStore> = self.keys.clone();
        ProgramAdmin::new(chain, cfg, store)
    }

    fn key(&self, label: &str) -> Pubkey {
        self.keys.lookup(label).unwrap().unwrap()
    }
}

fn empty_chain() -> MockChain {
    MockChain::new(Pubkey::new_unique(), AccountGraph::default())
}

fn publishers_of(graph: &AccountGraph, price: &Pubkey) -> Vec<Pubkey> {
    graph.prices[price].components.iter().map(|c| c.publisher_key).collect()
}

#[tokio::test]
async fn test_fresh_program_is_built_then_in_sync() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    let reference = fx.reference(&["pub1"], &["pub1", "pub2"], "{}");

    let first = admin.sync(&reference, CancelFlag::new()).await.unwrap();
    assert!(first.plan.issues.is_empty(), "{:?}", first.plan.issues);
    let report = first.report.expect("submitted");
    assert!(report.is_success(), "{:?}", report);

    let graph = admin.rpc().snapshot();
    assert_eq!(graph.mappings.len(), 1);
    let mapping = &graph.mappings[&fx.key("mapping_0")];
    assert_eq!(mapping.product_keys.len(), 2);

    let (btc, btc_price) = (fx.key("product_BTCUSD"), fx.key("price_BTCUSD"));
    assert_eq!(graph.products[&btc].first_price_key, btc_price);
    assert_eq!(graph.products[&btc].symbol(), Some("Crypto.BTC/USD"));
    assert_eq!(publishers_of(&graph, &btc_price), vec![fx.pub1]);
    assert_eq!(graph.prices[&btc_price].min_publishers, 1);
    assert_eq!(graph.prices[&btc_price].exponent, -8);

    let eth_price = fx.key("price_ETHUSD");
    let mut eth = publishers_of(&graph, &eth_price);
    eth.sort();
    let mut expected = vec![fx.pub1, fx.pub2];
    expected.sort();
    assert_eq!(eth, expected);

    let sent = admin.rpc().sent_count();
    let second = admin.sync(&reference, CancelFlag::new()).await.unwrap();
    assert!(second.plan.is_empty());
    assert!(second.report.is_none());
    assert_eq!(admin.rpc().sent_count(), sent);
}

#[tokio::test]
async fn test_new_mapping_follows_the_products_that_fill_the_tail() {
    let fx = Fixture::new();
    let tail = fx.keys.insert("mapping_0", Keypair::new());
    let mut graph = AccountGraph::default();
    graph.mappings.insert(
        tail,
        MappingAccount {
            key: tail,
            next_mapping_key: Pubkey::default(),
            product_keys: (0..MAPPING_PRODUCT_LIMIT - 1).map(|_| Pubkey::new_unique()).collect(),
        },
    );
    let admin = fx.admin(MockChain::new(Pubkey::new_unique(), graph), true);
    let reference = fx.reference(&["pub1"], &["pub1"], "{}");

    let outcome = admin.sync(&reference, CancelFlag::new()).await.unwrap();
    let labels: Vec<&str> = outcome.plan.steps.iter().map(|s| s.label.as_str()).collect();
    let added_mapping = labels.iter().position(|l| *l == "add mapping_1").unwrap();
    let added_btc = labels.iter().position(|l| *l == "add product BTCUSD").unwrap();
    let added_eth = labels.iter().position(|l| *l == "add product ETHUSD").unwrap();
    assert!(added_btc < added_mapping && added_mapping < added_eth, "{labels:?}");
    let report = outcome.report.expect("submitted");
    assert!(report.is_success(), "{report:?}");

    let graph = admin.rpc().snapshot();
    let m1 = fx.key("mapping_1");
    assert_eq!(graph.mappings[&tail].next_mapping_key, m1);
    assert_eq!(graph.mappings[&tail].product_keys.last(), Some(&fx.key("product_BTCUSD")));
    assert_eq!(graph.mappings[&m1].product_keys, vec![fx.key("product_ETHUSD")]);
    assert!(admin.sync(&reference, CancelFlag::new()).await.unwrap().plan.is_empty());
}

#[tokio::test]
async fn test_publisher_swap_disables_before_enabling() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    admin.sync(&fx.reference(&["pub1"], &[], "{}"), CancelFlag::new()).await.unwrap();

    let swapped = fx.reference(&["pub2"], &[], "{}");
    let outcome = admin.sync(&swapped, CancelFlag::new()).await.unwrap();
    let ops: Vec<OracleInstruction> =
        outcome.plan.instructions().map(|ix| OracleInstruction::unpack(&ix.data).unwrap()).collect();
    assert_eq!(
        ops,
        vec![
            OracleInstruction::DelPublisher { publisher: fx.pub1 },
            OracleInstruction::AddPublisher { publisher: fx.pub2 },
        ]
    );
    assert!(outcome.report.unwrap().is_success());

    let graph = admin.rpc().snapshot();
    assert_eq!(publishers_of(&graph, &fx.key("price_BTCUSD")), vec![fx.pub2]);
    assert!(admin.sync(&swapped, CancelFlag::new()).await.unwrap().plan.is_empty());
}

#[tokio::test]
async fn test_network_override_revokes_one_symbol() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    admin.sync(&fx.reference(&["pub1", "pub2"], &["pub1"], "{}"), CancelFlag::new()).await.unwrap();

    let revoked = fx.reference(&["pub1", "pub2"], &["pub1"], r#"{"devnet": {"BTCUSD": false}}"#);
    let outcome = admin.sync(&revoked, CancelFlag::new()).await.unwrap();
    assert!(outcome.report.unwrap().is_success());

    let graph = admin.rpc().snapshot();
    assert!(publishers_of(&graph, &fx.key("price_BTCUSD")).is_empty());
    assert_eq!(publishers_of(&graph, &fx.key("price_ETHUSD")), vec![fx.pub1]);
    assert!(admin.sync(&revoked, CancelFlag::new()).await.unwrap().plan.is_empty());

    // the same override for another network changes nothing
    let elsewhere = fx.reference(&["pub1", "pub2"], &["pub1"], r#"{"mainnet-beta": {"BTCUSD": false}}"#);
    let back = admin.sync(&elsewhere, CancelFlag::new()).await.unwrap();
    assert_eq!(back.plan.instruction_count(), 2);
}

#[tokio::test]
async fn test_dry_run_prints_and_sends_nothing() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let outfile = dir.path().join("plan.json");
    let admin = fx.admin_with(empty_chain(), |cfg| {
        cfg.send_transactions = false;
        cfg.outfile = Some(outfile.clone());
    });

    let outcome = admin.sync(&fx.reference(&["pub1"], &[], "{}"), CancelFlag::new()).await.unwrap();
    assert!(outcome.report.is_none());
    assert_eq!(admin.rpc().sent_count(), 0);
    assert_eq!(admin.rpc().snapshot(), AccountGraph::default());

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&outfile).unwrap()).unwrap();
    let ixs = written.as_array().unwrap();
    assert_eq!(ixs.len(), outcome.plan.instruction_count());
    assert_eq!(ixs[0]["accounts"][0]["pubkey"], fx.funding.to_string());
}

#[tokio::test]
async fn test_listing_after_build() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    admin.sync(&fx.reference(&["pub1"], &["pub2"], "{}"), CancelFlag::new()).await.unwrap();

    let tree = admin.list_accounts(&fx.publishers).await.unwrap();
    assert!(tree.starts_with(&format!("Mapping: {}", fx.key("mapping_0"))));
    assert!(tree.contains("  Product: Crypto.BTC/USD"));
    assert!(tree.contains("    Price: -8 exponent (1 components)"));
    assert!(tree.contains("      Publisher: pub1"));
    assert!(tree.contains("      Publisher: pub2"));
}

#[tokio::test]
async fn test_listing_empty_program_fails() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    assert!(admin.list_accounts(&fx.publishers).await.is_err());
}

#[tokio::test]
async fn test_delete_price_unlinks_it_from_the_product() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    admin.sync(&fx.reference(&["pub1"], &[], "{}"), CancelFlag::new()).await.unwrap();

    let (btc, btc_price) = (fx.key("product_BTCUSD"), fx.key("price_BTCUSD"));
    let report = admin.delete_price(btc, btc_price, CancelFlag::new()).await.unwrap();
    assert!(report.is_success());

    let graph = admin.rpc().snapshot();
    assert!(!graph.prices.contains_key(&btc_price));
    assert!(!graph.products[&btc].has_price());
}

#[tokio::test]
async fn test_delete_product_removes_it_from_the_mapping() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    admin.sync(&fx.reference(&[], &[], "{}"), CancelFlag::new()).await.unwrap();

    let (mapping, eth) = (fx.key("mapping_0"), fx.key("product_ETHUSD"));
    let eth_price = fx.key("price_ETHUSD");
    admin.delete_price(eth, eth_price, CancelFlag::new()).await.unwrap();
    let report = admin.delete_product(mapping, eth, CancelFlag::new()).await.unwrap();
    assert!(report.is_success());

    let graph = admin.rpc().snapshot();
    assert_eq!(graph.mappings[&mapping].product_keys, vec![fx.key("product_BTCUSD")]);
    assert!(!graph.products.contains_key(&eth));
}

#[tokio::test]
async fn test_upgrade_authority_proposal_is_signed_by_funding() {
    let fx = Fixture::new();
    let admin = fx.admin(empty_chain(), true);
    let new_authority = Keypair::new().pubkey();

    let report = admin.migrate_upgrade_authority(new_authority, CancelFlag::new()).await.unwrap();
    assert!(report.is_success());

    let sent = admin.rpc().sent.lock().unwrap();
    let tx = &sent[0];
    assert_eq!(tx.message.account_keys[0], fx.funding);
    assert!(tx.message.account_keys.contains(&AUTHORITY_ESCROW_PROGRAM_ID));
    assert!(tx.message.account_keys.contains(&new_authority));
}

#[cfg(unix)]
#[tokio::test]
async fn test_restore_links_from_chain() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsKeyStore::new(dir.path()));
    store.generate_keypair(FUNDING_LABEL).unwrap();

    let chain = empty_chain();
    let mut cfg = AdminConfig::new("devnet", None, chain.program, dir.path()).unwrap();
    cfg.generate_keys = true;
    let keys: Arc<dyn KeyStore> = store.clone();
    let admin = ProgramAdmin::new(chain, cfg, keys);
    let reference = fx.reference(&["pub1"], &[], "{}");
    admin.sync(&reference, CancelFlag::new()).await.unwrap();

    let btc = store.lookup("product_BTCUSD").unwrap().unwrap();
    let labels = ["mapping_0", "product_BTCUSD", "price_BTCUSD", "product_ETHUSD", "price_ETHUSD"];
    for label in labels {
        std::fs::remove_file(dir.path().join(format!("{label}.json"))).unwrap();
    }
    assert_eq!(store.lookup("product_BTCUSD").unwrap(), None);

    assert_eq!(admin.restore_links(&fx.products).await.unwrap(), labels.len());
    assert_eq!(store.lookup("product_BTCUSD").unwrap(), Some(btc));
    assert!(admin.sync(&reference, CancelFlag::new()).await.unwrap().plan.is_empty());
}
