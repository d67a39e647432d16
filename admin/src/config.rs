use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::fetch::FetchConfig;
use crate::sender::SubmitConfig;

pub const DEFAULT_COMMITMENT: &str = "finalized";

/// Public RPC endpoint for a well-known network name.
pub fn default_rpc_endpoint(network: &str) -> Option<&'static str> {
    match network {
        "devnet" => Some("https://api.devnet.solana.com"),
        "testnet" => Some("https://api.testnet.solana.com"),
        "mainnet-beta" => Some("https://api.mainnet-beta.solana.com"),
        "localhost" => Some("http://127.0.0.1:8899"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network `{0}`; pass an RPC endpoint")]
    UnknownNetwork(String),
    #[error("unknown commitment `{0}` (expected processed, confirmed or finalized)")]
    BadCommitment(String),
}

pub fn parse_commitment(s: &str) -> Result<CommitmentConfig, ConfigError> {
    match s {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(ConfigError::BadCommitment(other.to_string())),
    }
}

/// Settings shared by every command that talks to a cluster.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub network: String,
    pub rpc_endpoint: String,
    pub program_key: Pubkey,
    pub key_dir: PathBuf,
    pub commitment: CommitmentConfig,
    /// Submit transactions; otherwise print the planned instructions.
    pub send_transactions: bool,
    pub generate_keys: bool,
    pub outfile: Option<PathBuf>,
    pub confirm_timeout: Duration,
    /// Stop submitting new batches after this long.
    pub run_timeout: Option<Duration>,
    pub fetch: FetchConfig,
}

impl AdminConfig {
    /// Defaults for `network`, with the endpoint taken from the network name
    /// unless `rpc_endpoint` is given.
    pub fn new(
        network: &str,
        rpc_endpoint: Option<&str>,
        program_key: Pubkey,
        key_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let rpc_endpoint = match rpc_endpoint {
            Some(url) => url.to_string(),
            None => default_rpc_endpoint(network)
                .ok_or_else(|| ConfigError::UnknownNetwork(network.to_string()))?
                .to_string(),
        };
        Ok(Self {
            network: network.to_string(),
            rpc_endpoint,
            program_key,
            key_dir: key_dir.into(),
            commitment: CommitmentConfig::finalized(),
            send_transactions: true,
            generate_keys: false,
            outfile: None,
            confirm_timeout: Duration::from_secs(90),
            run_timeout: None,
            fetch: FetchConfig::default(),
        })
    }

    pub fn with_commitment(mut self, commitment: &str) -> Result<Self, ConfigError> {
        self.commitment = parse_commitment(commitment)?;
        Ok(self)
    }

    pub fn submit_config(&self) -> SubmitConfig {
        SubmitConfig {
            commitment: self.commitment,
            confirm_timeout: self.confirm_timeout,
            fetch: self.fetch.clone(),
            ..SubmitConfig::default()
        }
    }
}

/// `true`/`false` flags as accepted from the environment.
pub fn parse_bool_flag(s: &str) -> Result<bool, String> {
    bool::from_str(&s.to_ascii_lowercase()).map_err(|_| format!("expected `true` or `false`, got `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_follows_network() {
        let cfg = AdminConfig::new("devnet", None, Pubkey::new_unique(), "keys").unwrap();
        assert_eq!(cfg.rpc_endpoint, "https://api.devnet.solana.com");
        assert_eq!(cfg.commitment, CommitmentConfig::finalized());

        let cfg = AdminConfig::new("pythnet", Some("http://rpc.local:8899"), Pubkey::new_unique(), "keys").unwrap();
        assert_eq!(cfg.rpc_endpoint, "http://rpc.local:8899");

        assert_eq!(
            AdminConfig::new("pythnet", None, Pubkey::new_unique(), "keys").unwrap_err(),
            ConfigError::UnknownNetwork("pythnet".into())
        );
    }

    #[test]
    fn commitment_names() {
        assert_eq!(parse_commitment("confirmed").unwrap(), CommitmentConfig::confirmed());
        assert!(matches!(parse_commitment("max"), Err(ConfigError::BadCommitment(_))));
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag("TRUE"), Ok(true));
        assert_eq!(parse_bool_flag("false"), Ok(false));
        assert!(parse_bool_flag("yes").is_err());
    }
}
