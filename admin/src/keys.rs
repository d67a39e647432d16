//! Keypair storage.
//!
//! On disk every keypair lives in `account_<pubkey>.json` (the secret key as a
//! JSON byte array) and is reachable through a human-readable symlink
//! `<label>.json`, e.g. `mapping_0.json`, `product_BTCUSD.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, write_keypair_file, Keypair},
    signer::Signer,
};

pub const FUNDING_LABEL: &str = "funding";

pub fn mapping_label(index: usize) -> String {
    format!("mapping_{index}")
}

pub fn product_label(jump_symbol: &str) -> String {
    format!("product_{jump_symbol}")
}

pub fn price_label(jump_symbol: &str) -> String {
    format!("price_{jump_symbol}")
}

/// Label under which a keypair is always reachable by its own address.
pub fn account_label(key: &Pubkey) -> String {
    format!("account_{key}")
}

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("no keypair labelled `{0}`")]
    NotFound(String),
    #[error("label `{0}` is already taken")]
    AlreadyExists(String),
    #[error("keypair file {path}: {message}")]
    File { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait KeyStore: Send + Sync {
    fn load_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError>;

    /// Creates a fresh keypair reachable as `label` and as its account label.
    fn generate_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError>;

    /// Points `label` at the existing keypair for `key`.
    fn restore_symlink(&self, key: &Pubkey, label: &str) -> Result<(), KeyStoreError>;

    fn lookup(&self, label: &str) -> Result<Option<Pubkey>, KeyStoreError> {
        match self.load_keypair(label) {
            Ok(kp) => Ok(Some(kp.pubkey())),
            Err(KeyStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Existing key for `label`, or a new one when `generate` is set.
    fn resolve(&self, label: &str, generate: bool) -> Result<Option<Pubkey>, KeyStoreError> {
        match self.lookup(label)? {
            Some(k) => Ok(Some(k)),
            None if generate => {
                let kp = self.generate_keypair(label)?;
                tracing::info!(target: "keys", label, key = %kp.pubkey(), "generated keypair");
                Ok(Some(kp.pubkey()))
            }
            None => Ok(None),
        }
    }

    fn has_key(&self, key: &Pubkey) -> Result<bool, KeyStoreError> {
        Ok(self.lookup(&account_label(key))?.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct FsKeyStore {
    dir: PathBuf,
}

impl FsKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.json"))
    }
}

impl KeyStore for FsKeyStore {
    fn load_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError> {
        let path = self.path_for(label);
        if !path.exists() {
            return Err(KeyStoreError::NotFound(label.to_string()));
        }
        read_keypair_file(&path).map_err(|e| KeyStoreError::File { path, message: e.to_string() })
    }

    fn generate_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError> {
        let link = self.path_for(label);
        if link.symlink_metadata().is_ok() {
            return Err(KeyStoreError::AlreadyExists(label.to_string()));
        }
        let kp = Keypair::new();
        let file_name = format!("{}.json", account_label(&kp.pubkey()));
        let path = self.dir.join(&file_name);
        write_keypair_file(&kp, &path).map_err(|e| KeyStoreError::File { path, message: e.to_string() })?;
        std::os::unix::fs::symlink(&file_name, &link)?;
        Ok(kp)
    }

    fn restore_symlink(&self, key: &Pubkey, label: &str) -> Result<(), KeyStoreError> {
        let file_name = format!("{}.json", account_label(key));
        if !self.dir.join(&file_name).exists() {
            return Err(KeyStoreError::NotFound(account_label(key)));
        }
        let link = self.path_for(label);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(&file_name, &link)?;
        tracing::debug!(target: "keys", label, %key, "restored symlink");
        Ok(())
    }
}

/// In-process store for tests and dry runs that must not touch disk.
#[derive(Default)]
pub struct MemoryKeyStore {
    by_label: Mutex<HashMap<String, Pubkey>>,
    keypairs: Mutex<HashMap<Pubkey, Keypair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `kp` under `label`, returning its address.
    pub fn insert(&self, label: &str, kp: Keypair) -> Pubkey {
        let key = kp.pubkey();
        if let Ok(mut labels) = self.by_label.lock() {
            labels.insert(label.to_string(), key);
            labels.insert(account_label(&key), key);
        }
        if let Ok(mut kps) = self.keypairs.lock() {
            kps.insert(key, kp);
        }
        key
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError> {
        let key = self
            .by_label
            .lock()
            .ok()
            .and_then(|l| l.get(label).copied())
            .ok_or_else(|| KeyStoreError::NotFound(label.to_string()))?;
        self.keypairs
            .lock()
            .ok()
            .and_then(|k| k.get(&key).map(Keypair::insecure_clone))
            .ok_or_else(|| KeyStoreError::NotFound(label.to_string()))
    }

    fn generate_keypair(&self, label: &str) -> Result<Keypair, KeyStoreError> {
        if self.lookup(label)?.is_some() {
            return Err(KeyStoreError::AlreadyExists(label.to_string()));
        }
        let kp = Keypair::new();
        let out = kp.insecure_clone();
        self.insert(label, kp);
        Ok(out)
    }

    fn restore_symlink(&self, key: &Pubkey, label: &str) -> Result<(), KeyStoreError> {
        let known = self.keypairs.lock().map(|k| k.contains_key(key)).unwrap_or(false);
        if !known {
            return Err(KeyStoreError::NotFound(account_label(key)));
        }
        if let Ok(mut labels) = self.by_label.lock() {
            labels.insert(label.to_string(), *key);
        }
        Ok(())
    }
}
