//! Reference configuration: what the on-chain state should look like.
//!
//! Four JSON documents feed a sync run:
//! - products: the symbols that must exist, with their metadata and exponent
//! - publishers: publisher name → key
//! - permissions: jump symbol → account type → publisher names
//! - overrides: network → jump symbol → `false` to revoke every publisher

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use solana_program::pubkey::Pubkey;

use crate::metadata::ProductMetadata;

/// Account type tier publishers are permissioned on.
pub const PRICE_ACCOUNT_TYPE: &str = "price";

pub type ReferencePermissions = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;
pub type ReferenceOverrides = BTreeMap<String, BTreeMap<String, bool>>;
pub type ReferenceProducts = BTreeMap<String, ReferenceProduct>;

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parsing {what}: {source}")]
    Json { what: &'static str, source: serde_json::Error },
    #[error("product {jump_symbol} has no `symbol` attribute")]
    MissingSymbol { jump_symbol: String },
    #[error("product {jump_symbol} is listed twice")]
    DuplicateProduct { jump_symbol: String },
    #[error("publisher {name} has invalid key {value}")]
    InvalidPublisherKey { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceProduct {
    pub jump_symbol: String,
    pub symbol: String,
    pub exponent: i32,
    pub metadata: ProductMetadata,
    pub min_publishers: Option<u8>,
}

// Feed export shape: [{ "account", "attr_dict": {...}, "metadata": {...} }]
#[derive(Deserialize)]
struct ExportedProduct {
    attr_dict: ProductMetadata,
    metadata: ExportedProductInfo,
}

#[derive(Deserialize)]
struct ExportedProductInfo {
    jump_symbol: String,
    price_exp: i32,
    #[serde(default)]
    min_publishers: Option<u8>,
}

// Keyed shape: { "<jump_symbol>": { "symbol"?, "exponent", "metadata": {...} } }
#[derive(Deserialize)]
struct KeyedProduct {
    #[serde(default)]
    symbol: Option<String>,
    exponent: i32,
    metadata: ProductMetadata,
    #[serde(default)]
    min_publishers: Option<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProductsDocument {
    Exported(Vec<ExportedProduct>),
    Keyed(BTreeMap<String, KeyedProduct>),
}

pub fn parse_products_json(text: &str) -> Result<ReferenceProducts, ReferenceError> {
    let doc: ProductsDocument = serde_json::from_str(text)
        .map_err(|source| ReferenceError::Json { what: "products", source })?;

    let mut out = ReferenceProducts::new();
    let entries: Vec<(String, Option<String>, i32, ProductMetadata, Option<u8>)> = match doc {
        ProductsDocument::Exported(list) => list
            .into_iter()
            .map(|p| (p.metadata.jump_symbol, None, p.metadata.price_exp, p.attr_dict, p.metadata.min_publishers))
            .collect(),
        ProductsDocument::Keyed(map) => map
            .into_iter()
            .map(|(jump, p)| (jump, p.symbol, p.exponent, p.metadata, p.min_publishers))
            .collect(),
    };

    for (jump_symbol, symbol, exponent, mut metadata, min_publishers) in entries {
        let symbol = match symbol.or_else(|| metadata.symbol().map(str::to_string)) {
            Some(s) => s,
            None => return Err(ReferenceError::MissingSymbol { jump_symbol }),
        };
        if metadata.symbol().is_none() {
            metadata.insert("symbol", symbol.clone());
        }
        if out.contains_key(&jump_symbol) {
            return Err(ReferenceError::DuplicateProduct { jump_symbol });
        }
        out.insert(
            jump_symbol.clone(),
            ReferenceProduct { jump_symbol, symbol, exponent, metadata, min_publishers },
        );
    }
    Ok(out)
}

/// Publisher directory, resolvable in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencePublishers {
    keys: BTreeMap<String, Pubkey>,
    names: HashMap<Pubkey, String>,
}

impl ReferencePublishers {
    pub fn insert(&mut self, name: impl Into<String>, key: Pubkey) {
        let name = name.into();
        self.names.insert(key, name.clone());
        self.keys.insert(name, key);
    }

    pub fn key(&self, name: &str) -> Option<Pubkey> {
        self.keys.get(name).copied()
    }

    pub fn name(&self, key: &Pubkey) -> Option<&str> {
        self.names.get(key).map(String::as_str)
    }

    /// Human-readable label, falling back to the raw key.
    pub fn display(&self, key: &Pubkey) -> String {
        match self.name(key) {
            Some(n) => n.to_string(),
            None => format!("??? ({key})"),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub fn parse_publishers_json(text: &str) -> Result<ReferencePublishers, ReferenceError> {
    let raw: BTreeMap<String, String> = serde_json::from_str(text)
        .map_err(|source| ReferenceError::Json { what: "publishers", source })?;
    let mut out = ReferencePublishers::default();
    for (name, value) in raw {
        let key = Pubkey::from_str(&value)
            .map_err(|_| ReferenceError::InvalidPublisherKey { name: name.clone(), value: value.clone() })?;
        out.insert(name, key);
    }
    Ok(out)
}

pub fn parse_permissions_json(text: &str) -> Result<ReferencePermissions, ReferenceError> {
    serde_json::from_str(text).map_err(|source| ReferenceError::Json { what: "permissions", source })
}

pub fn parse_overrides_json(text: &str) -> Result<ReferenceOverrides, ReferenceError> {
    serde_json::from_str(text).map_err(|source| ReferenceError::Json { what: "overrides", source })
}

pub fn read_reference_file(path: &Path) -> Result<String, ReferenceError> {
    std::fs::read_to_string(path).map_err(|source| ReferenceError::Io { path: path.to_path_buf(), source })
}
