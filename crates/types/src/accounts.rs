//! Oracle account model: mapping / product / price accounts and the graph they form.

use std::collections::{BTreeMap, BTreeSet};

use solana_program::pubkey::Pubkey;

use crate::metadata::{EncodingError, ProductMetadata};

pub const MAGIC: u32 = 0xa1b2_c3d4;
pub const VERSION: u32 = 2;

pub const MAPPING_ACCOUNT_SIZE: usize = 20_536;
pub const MAPPING_PRODUCT_LIMIT: usize = 640;
pub const PRODUCT_ACCOUNT_SIZE: usize = 512;
pub const PRICE_ACCOUNT_SIZE: usize = 3_312;
pub const MAX_PRICE_COMPONENTS: usize = 32;

const HEADER_SIZE: usize = 16;
const MAPPING_PRODUCTS_OFFSET: usize = 56;
const PRODUCT_ATTRS_OFFSET: usize = 48;
/// Bytes of a product account available for metadata attributes.
pub const PRODUCT_METADATA_CAPACITY: usize = PRODUCT_ACCOUNT_SIZE - PRODUCT_ATTRS_OFFSET;

// price account field offsets
const PRICE_TYPE_OFFSET: usize = 16;
const PRICE_EXPO_OFFSET: usize = 20;
const PRICE_NUM_OFFSET: usize = 24;
const PRICE_MIN_PUB_OFFSET: usize = 104;
const PRICE_PROD_OFFSET: usize = 112;
const PRICE_NEXT_OFFSET: usize = 144;
const PRICE_COMPONENTS_OFFSET: usize = 240;
const PRICE_COMPONENT_SIZE: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AccountType {
    Mapping = 1,
    Product = 2,
    Price = 3,
}

impl AccountType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Mapping),
            2 => Some(Self::Product),
            3 => Some(Self::Price),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountParseError {
    #[error("account {key} too short: {len} bytes, need {need}")]
    TooShort { key: Pubkey, len: usize, need: usize },
    #[error("account {key} has bad magic {magic:#x}")]
    BadMagic { key: Pubkey, magic: u32 },
    #[error("account {key} has unsupported version {version}")]
    BadVersion { key: Pubkey, version: u32 },
    #[error("account {key} has unknown type {ty}")]
    UnknownType { key: Pubkey, ty: u32 },
    #[error("mapping account {key} claims {count} products (limit {MAPPING_PRODUCT_LIMIT})")]
    TooManyProducts { key: Pubkey, count: usize },
    #[error("price account {key} claims {count} components (limit {MAX_PRICE_COMPONENTS})")]
    TooManyComponents { key: Pubkey, count: usize },
    #[error("product account {key}: {source}")]
    Metadata { key: Pubkey, source: EncodingError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingAccount {
    pub key: Pubkey,
    pub next_mapping_key: Pubkey,
    pub product_keys: Vec<Pubkey>,
}

impl MappingAccount {
    pub fn is_tail(&self) -> bool {
        self.next_mapping_key == Pubkey::default()
    }

    pub fn free_slots(&self) -> usize {
        MAPPING_PRODUCT_LIMIT.saturating_sub(self.product_keys.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAccount {
    pub key: Pubkey,
    pub first_price_key: Pubkey,
    pub metadata: ProductMetadata,
}

impl ProductAccount {
    pub fn symbol(&self) -> Option<&str> {
        self.metadata.symbol()
    }

    pub fn has_price(&self) -> bool {
        self.first_price_key != Pubkey::default()
    }
}

/// A publisher slot in a price account. Presence on chain means enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceComponent {
    pub publisher_key: Pubkey,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceAccount {
    pub key: Pubkey,
    pub price_type: u32,
    pub exponent: i32,
    pub component_count: u32,
    pub min_publishers: u8,
    pub product_key: Pubkey,
    pub next_price_key: Pubkey,
    pub components: Vec<PriceComponent>,
}

impl PriceAccount {
    pub fn enabled_publishers(&self) -> BTreeSet<Pubkey> {
        self.components
            .iter()
            .filter(|c| c.is_enabled)
            .map(|c| c.publisher_key)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleAccount {
    Mapping(MappingAccount),
    Product(ProductAccount),
    Price(PriceAccount),
    /// Allocated and owned by the program but never initialized (all-zero header).
    Uninitialized(Pubkey),
}

impl OracleAccount {
    pub fn key(&self) -> Pubkey {
        match self {
            Self::Mapping(a) => a.key,
            Self::Product(a) => a.key,
            Self::Price(a) => a.key,
            Self::Uninitialized(k) => *k,
        }
    }

    pub fn parse(key: Pubkey, data: &[u8]) -> Result<Self, AccountParseError> {
        need(key, data, HEADER_SIZE)?;
        let magic = read_u32(data, 0);
        if magic == 0 && data[..HEADER_SIZE].iter().all(|b| *b == 0) {
            return Ok(Self::Uninitialized(key));
        }
        if magic != MAGIC {
            return Err(AccountParseError::BadMagic { key, magic });
        }
        let version = read_u32(data, 4);
        if version != VERSION {
            return Err(AccountParseError::BadVersion { key, version });
        }
        let ty = read_u32(data, 8);
        let used = (read_u32(data, 12) as usize).min(data.len());
        match AccountType::from_u32(ty) {
            Some(AccountType::Mapping) => parse_mapping(key, data).map(Self::Mapping),
            Some(AccountType::Product) => parse_product(key, data, used).map(Self::Product),
            Some(AccountType::Price) => parse_price(key, data).map(Self::Price),
            None => Err(AccountParseError::UnknownType { key, ty }),
        }
    }
}

fn parse_mapping(key: Pubkey, data: &[u8]) -> Result<MappingAccount, AccountParseError> {
    need(key, data, MAPPING_PRODUCTS_OFFSET)?;
    let count = read_u32(data, HEADER_SIZE) as usize;
    if count > MAPPING_PRODUCT_LIMIT {
        return Err(AccountParseError::TooManyProducts { key, count });
    }
    need(key, data, MAPPING_PRODUCTS_OFFSET + count * 32)?;
    let product_keys = (0..count)
        .map(|i| read_pubkey(data, MAPPING_PRODUCTS_OFFSET + i * 32))
        .collect();
    Ok(MappingAccount { key, next_mapping_key: read_pubkey(data, 24), product_keys })
}

fn parse_product(key: Pubkey, data: &[u8], used: usize) -> Result<ProductAccount, AccountParseError> {
    need(key, data, PRODUCT_ATTRS_OFFSET)?;
    let attrs = &data[PRODUCT_ATTRS_OFFSET..used.max(PRODUCT_ATTRS_OFFSET)];
    let metadata = ProductMetadata::decode(attrs)
        .map_err(|source| AccountParseError::Metadata { key, source })?;
    Ok(ProductAccount { key, first_price_key: read_pubkey(data, HEADER_SIZE), metadata })
}

fn parse_price(key: Pubkey, data: &[u8]) -> Result<PriceAccount, AccountParseError> {
    need(key, data, PRICE_COMPONENTS_OFFSET)?;
    let count = read_u32(data, PRICE_NUM_OFFSET) as usize;
    if count > MAX_PRICE_COMPONENTS {
        return Err(AccountParseError::TooManyComponents { key, count });
    }
    need(key, data, PRICE_COMPONENTS_OFFSET + count * PRICE_COMPONENT_SIZE)?;
    let components = (0..count)
        .map(|i| PriceComponent {
            publisher_key: read_pubkey(data, PRICE_COMPONENTS_OFFSET + i * PRICE_COMPONENT_SIZE),
            is_enabled: true,
        })
        .collect();
    Ok(PriceAccount {
        key,
        price_type: read_u32(data, PRICE_TYPE_OFFSET),
        exponent: read_u32(data, PRICE_EXPO_OFFSET) as i32,
        component_count: count as u32,
        min_publishers: data[PRICE_MIN_PUB_OFFSET],
        product_key: read_pubkey(data, PRICE_PROD_OFFSET),
        next_price_key: read_pubkey(data, PRICE_NEXT_OFFSET),
        components,
    })
}

fn need(key: Pubkey, data: &[u8], need: usize) -> Result<(), AccountParseError> {
    if data.len() < need {
        return Err(AccountParseError::TooShort { key, len: data.len(), need });
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_pubkey(data: &[u8], at: usize) -> Pubkey {
    let mut b = [0u8; 32];
    b.copy_from_slice(&data[at..at + 32]);
    Pubkey::new_from_array(b)
}

fn write_header(buf: &mut [u8], ty: AccountType, used: usize) {
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8..12].copy_from_slice(&(ty as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&(used as u32).to_le_bytes());
}

// Byte images in the program's layout. Used to seed local validators and
// mock RPC backends.
impl MappingAccount {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; MAPPING_ACCOUNT_SIZE];
        let n = self.product_keys.len().min(MAPPING_PRODUCT_LIMIT);
        write_header(&mut buf, AccountType::Mapping, MAPPING_PRODUCTS_OFFSET + n * 32);
        buf[16..20].copy_from_slice(&(n as u32).to_le_bytes());
        buf[24..56].copy_from_slice(self.next_mapping_key.as_ref());
        for (i, k) in self.product_keys.iter().take(n).enumerate() {
            let at = MAPPING_PRODUCTS_OFFSET + i * 32;
            buf[at..at + 32].copy_from_slice(k.as_ref());
        }
        buf
    }
}

impl ProductAccount {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let attrs = self.metadata.encode_with_capacity(PRODUCT_METADATA_CAPACITY)?;
        let mut buf = vec![0u8; PRODUCT_ACCOUNT_SIZE];
        write_header(&mut buf, AccountType::Product, PRODUCT_ATTRS_OFFSET + attrs.len());
        buf[16..48].copy_from_slice(self.first_price_key.as_ref());
        buf[PRODUCT_ATTRS_OFFSET..PRODUCT_ATTRS_OFFSET + attrs.len()].copy_from_slice(&attrs);
        Ok(buf)
    }
}

impl PriceAccount {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PRICE_ACCOUNT_SIZE];
        // the program stores only active publishers
        let enabled: Vec<&PriceComponent> =
            self.components.iter().filter(|c| c.is_enabled).take(MAX_PRICE_COMPONENTS).collect();
        let n = enabled.len();
        write_header(&mut buf, AccountType::Price, PRICE_COMPONENTS_OFFSET + n * PRICE_COMPONENT_SIZE);
        buf[PRICE_TYPE_OFFSET..PRICE_TYPE_OFFSET + 4].copy_from_slice(&self.price_type.to_le_bytes());
        buf[PRICE_EXPO_OFFSET..PRICE_EXPO_OFFSET + 4].copy_from_slice(&self.exponent.to_le_bytes());
        buf[PRICE_NUM_OFFSET..PRICE_NUM_OFFSET + 4].copy_from_slice(&(n as u32).to_le_bytes());
        buf[PRICE_MIN_PUB_OFFSET] = self.min_publishers;
        buf[PRICE_PROD_OFFSET..PRICE_PROD_OFFSET + 32].copy_from_slice(self.product_key.as_ref());
        buf[PRICE_NEXT_OFFSET..PRICE_NEXT_OFFSET + 32].copy_from_slice(self.next_price_key.as_ref());
        for (i, c) in enabled.iter().enumerate() {
            let at = PRICE_COMPONENTS_OFFSET + i * PRICE_COMPONENT_SIZE;
            buf[at..at + 32].copy_from_slice(c.publisher_key.as_ref());
        }
        buf
    }
}

/// Snapshot of every oracle account owned by the program, keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountGraph {
    pub mappings: BTreeMap<Pubkey, MappingAccount>,
    pub products: BTreeMap<Pubkey, ProductAccount>,
    pub prices: BTreeMap<Pubkey, PriceAccount>,
    pub uninitialized: BTreeSet<Pubkey>,
}

impl AccountGraph {
    pub fn from_accounts<I: IntoIterator<Item = OracleAccount>>(accounts: I) -> Self {
        let mut graph = Self::default();
        for a in accounts {
            graph.insert(a);
        }
        graph
    }

    pub fn insert(&mut self, account: OracleAccount) {
        match account {
            OracleAccount::Mapping(a) => {
                self.mappings.insert(a.key, a);
            }
            OracleAccount::Product(a) => {
                self.products.insert(a.key, a);
            }
            OracleAccount::Price(a) => {
                self.prices.insert(a.key, a);
            }
            OracleAccount::Uninitialized(k) => {
                self.uninitialized.insert(k);
            }
        }
    }

    pub fn contains(&self, key: &Pubkey) -> bool {
        self.mappings.contains_key(key)
            || self.products.contains_key(key)
            || self.prices.contains_key(key)
            || self.uninitialized.contains(key)
    }

    pub fn is_uninitialized(&self, key: &Pubkey) -> bool {
        self.uninitialized.contains(key)
    }

    pub fn product_by_symbol(&self, symbol: &str) -> Option<&ProductAccount> {
        self.products.values().find(|p| p.symbol() == Some(symbol))
    }

    /// Keys referenced by initialized accounts but absent from the snapshot.
    pub fn dangling_keys(&self) -> BTreeSet<Pubkey> {
        let zero = Pubkey::default();
        let mut referenced = BTreeSet::new();
        for m in self.mappings.values() {
            referenced.extend(m.product_keys.iter().copied());
            referenced.insert(m.next_mapping_key);
        }
        for p in self.products.values() {
            referenced.insert(p.first_price_key);
        }
        for p in self.prices.values() {
            referenced.insert(p.next_price_key);
        }
        referenced.remove(&zero);
        referenced.retain(|k| !self.contains(k));
        referenced
    }
}
