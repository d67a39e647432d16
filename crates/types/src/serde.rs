//! JSON shape of instructions printed by dry runs and the offline commands.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use solana_program::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

/// Base58 account addresses.
pub mod base58 {
    use super::*;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let text = String::deserialize(d)?;
        text.parse::<Pubkey>().map_err(|e| de::Error::custom(format!("bad pubkey {text:?}: {e}")))
    }
}

/// Instruction data as lowercase hex.
pub mod hex_data {
    use super::*;

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(&text).map_err(de::Error::custom)
    }
}

/// Instruction description used for dry runs and offline multisig review:
/// `{ program_id, data: hex, accounts: [{ pubkey, is_signer, is_writable }] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSer {
    #[serde(with = "crate::serde::base58")]
    pub program_id: Pubkey,
    #[serde(with = "crate::serde::hex_data")]
    pub data: Vec<u8>,
    pub accounts: Vec<AccountMetaSer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMetaSer {
    #[serde(with = "crate::serde::base58")]
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl From<&Instruction> for InstructionSer {
    fn from(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id,
            data: ix.data.clone(),
            accounts: ix
                .accounts
                .iter()
                .map(|m| AccountMetaSer { pubkey: m.pubkey, is_signer: m.is_signer, is_writable: m.is_writable })
                .collect(),
        }
    }
}

impl From<InstructionSer> for Instruction {
    fn from(s: InstructionSer) -> Self {
        Instruction {
            program_id: s.program_id,
            accounts: s
                .accounts
                .into_iter()
                .map(|m| AccountMeta { pubkey: m.pubkey, is_signer: m.is_signer, is_writable: m.is_writable })
                .collect(),
            data: s.data,
        }
    }
}
