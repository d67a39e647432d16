use std::path::Path;

use anyhow::{Context, Result};
use estimator::SizeBudget;
use oracle_types::InstructionSer;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
    signer::{Signer, SignerError},
    transaction::Transaction,
};

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("no instructions")]
    Empty,
    #[error("signing: {0}")]
    Signing(#[from] SignerError),
    #[error("encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error("transaction is {bytes}B, over the {limit}B limit")]
    TooLarge { bytes: usize, limit: usize },
}

/// Dry-run rendering: a JSON array of
/// `{program_id, data (hex), accounts: [{pubkey, is_signer, is_writable}]}`.
pub fn dry_run_json(instructions: &[Instruction]) -> serde_json::Result<String> {
    let ser: Vec<InstructionSer> = instructions.iter().map(InstructionSer::from).collect();
    serde_json::to_string_pretty(&ser)
}

/// Prints the dry-run JSON to stdout and, when given, writes it to `outfile`.
pub fn emit_dry_run(instructions: &[Instruction], outfile: Option<&Path>) -> Result<String> {
    let json = dry_run_json(instructions).context("rendering dry-run instructions")?;
    println!("{json}");
    if let Some(path) = outfile {
        std::fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(target: "sender", path = %path.display(), instructions = instructions.len(), "dry-run written");
    }
    Ok(json)
}

/// Builds and signs a legacy transaction, rejecting it if the wire form is over budget.
pub fn build_transaction(
    payer: &Pubkey,
    instructions: &[Instruction],
    signers: &[&dyn Signer],
    blockhash: Hash,
    budget: &SizeBudget,
) -> Result<Transaction, SerializeError> {
    if instructions.is_empty() {
        return Err(SerializeError::Empty);
    }
    let message = Message::new_with_blockhash(instructions, Some(payer), &blockhash);
    let mut tx = Transaction::new_unsigned(message);
    tx.try_sign(signers, blockhash)?;

    let bytes = bincode::serialize(&tx)?.len();
    if bytes > budget.limit() {
        return Err(SerializeError::TooLarge { bytes, limit: budget.limit() });
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions;
    use solana_sdk::signature::Keypair;

    #[test]
    fn dry_run_shape() {
        let program = Pubkey::new_unique();
        let funding = Pubkey::new_unique();
        let price = Pubkey::new_unique();
        let ix = instructions::set_minimum_publishers(&program, &funding, &price, 3);
        let json = dry_run_json(&[ix]).unwrap();

        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &v[0];
        assert_eq!(first["program_id"], program.to_string());
        assert_eq!(first["data"], "020000000c00000003000000");
        assert_eq!(first["accounts"][0]["pubkey"], funding.to_string());
        assert_eq!(first["accounts"][0]["is_signer"], true);
        assert_eq!(first["accounts"][1]["is_writable"], true);
    }

    #[test]
    fn outfile_receives_the_same_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let ix = instructions::init_mapping(&Pubkey::new_unique(), &Pubkey::new_unique(), &Pubkey::new_unique());
        let json = emit_dry_run(&[ix], Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), json);
    }

    #[test]
    fn signs_with_every_required_signer() {
        let program = Pubkey::new_unique();
        let funding = Keypair::new();
        let mapping = Keypair::new();
        let ix = instructions::init_mapping(&program, &funding.pubkey(), &mapping.pubkey());
        let tx = build_transaction(
            &funding.pubkey(),
            &[ix],
            &[&funding, &mapping],
            Hash::new_unique(),
            &SizeBudget::default(),
        )
        .unwrap();
        assert!(tx.is_signed());
        assert_eq!(tx.message.account_keys[0], funding.pubkey());
    }

    #[test]
    fn missing_signer_is_an_error() {
        let program = Pubkey::new_unique();
        let funding = Keypair::new();
        let ix = instructions::init_mapping(&program, &funding.pubkey(), &Pubkey::new_unique());
        let err = build_transaction(&funding.pubkey(), &[ix], &[&funding], Hash::new_unique(), &SizeBudget::default())
            .unwrap_err();
        assert!(matches!(err, SerializeError::Signing(_)));
    }

    #[test]
    fn tiny_budget_rejects() {
        let funding = Keypair::new();
        let ix = instructions::init_mapping(&Pubkey::new_unique(), &funding.pubkey(), &funding.pubkey());
        let budget = SizeBudget { max_tx_bytes: 100, bytes_slack: 0 };
        let err = build_transaction(&funding.pubkey(), &[ix], &[&funding], Hash::new_unique(), &budget).unwrap_err();
        assert!(matches!(err, SerializeError::TooLarge { limit: 100, .. }));
    }
}
