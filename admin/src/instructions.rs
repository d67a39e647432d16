//! Instruction encoders for the oracle program, plus the system and escrow
//! instructions the admin tool issues alongside them.
//!
//! Oracle instruction data starts with `version: u32 = 2, command: i32`,
//! followed by a command-specific payload. The funding account is always the
//! first account and signs; every oracle account touched also signs.

use oracle_types::{EncodingError, ProductMetadata, PRODUCT_METADATA_CAPACITY};
use solana_sdk::{
    bpf_loader_upgradeable,
    hash::hashv,
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_instruction,
};

pub const PROGRAM_VERSION: u32 = 2;
/// Price type `price` as understood by the oracle program.
pub const PRICE_TYPE_PRICE: u32 = 1;

/// Program holding upgrade authorities in escrow during a handover.
pub const AUTHORITY_ESCROW_PROGRAM_ID: Pubkey = pubkey!("escMHe7kSqPcDHx4HU44rAHhgdTLBZkUrU39aN8kMcL");

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstructionError {
    #[error("instruction data is {len} bytes, expected at least {need}")]
    TooShort { len: usize, need: usize },
    #[error("unsupported program version {0}")]
    BadVersion(u32),
    #[error("unknown command {0}")]
    UnknownCommand(i32),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleInstruction {
    InitMapping,
    AddMapping,
    AddProduct,
    UpdateProduct { metadata: ProductMetadata },
    AddPrice { exponent: i32, price_type: u32 },
    AddPublisher { publisher: Pubkey },
    DelPublisher { publisher: Pubkey },
    SetMinPublishers { min_publishers: u8 },
    DelPrice,
    DelProduct,
}

impl OracleInstruction {
    pub fn command(&self) -> i32 {
        match self {
            Self::InitMapping => 0,
            Self::AddMapping => 1,
            Self::AddProduct => 2,
            Self::UpdateProduct { .. } => 3,
            Self::AddPrice { .. } => 4,
            Self::AddPublisher { .. } => 5,
            Self::DelPublisher { .. } => 6,
            Self::SetMinPublishers { .. } => 12,
            Self::DelPrice => 15,
            Self::DelProduct => 16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitMapping => "init_mapping",
            Self::AddMapping => "add_mapping",
            Self::AddProduct => "add_product",
            Self::UpdateProduct { .. } => "upd_product",
            Self::AddPrice { .. } => "add_price",
            Self::AddPublisher { .. } => "add_publisher",
            Self::DelPublisher { .. } => "del_publisher",
            Self::SetMinPublishers { .. } => "set_min_pub",
            Self::DelPrice => "del_price",
            Self::DelProduct => "del_product",
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>, EncodingError> {
        let mut data = self.header();
        match self {
            Self::UpdateProduct { metadata } => {
                data.extend_from_slice(&metadata.encode_with_capacity(PRODUCT_METADATA_CAPACITY)?);
            }
            fixed => fixed.write_fixed_payload(&mut data),
        }
        Ok(data)
    }

    fn header(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + 32);
        data.extend_from_slice(&PROGRAM_VERSION.to_le_bytes());
        data.extend_from_slice(&self.command().to_le_bytes());
        data
    }

    // Payloads of every command except upd_product, which is length-checked.
    fn write_fixed_payload(&self, data: &mut Vec<u8>) {
        match self {
            Self::AddPrice { exponent, price_type } => {
                data.extend_from_slice(&exponent.to_le_bytes());
                data.extend_from_slice(&price_type.to_le_bytes());
            }
            Self::AddPublisher { publisher } | Self::DelPublisher { publisher } => {
                data.extend_from_slice(publisher.as_ref());
            }
            Self::SetMinPublishers { min_publishers } => {
                data.push(*min_publishers);
                data.extend_from_slice(&[0u8; 3]);
            }
            _ => {}
        }
    }

    pub fn unpack(data: &[u8]) -> Result<Self, InstructionError> {
        let version = u32::from_le_bytes(take::<4>(data, 0)?);
        if version != PROGRAM_VERSION {
            return Err(InstructionError::BadVersion(version));
        }
        let command = i32::from_le_bytes(take::<4>(data, 4)?);
        let ix = match command {
            0 => Self::InitMapping,
            1 => Self::AddMapping,
            2 => Self::AddProduct,
            3 => Self::UpdateProduct { metadata: ProductMetadata::decode(&data[HEADER_LEN..])? },
            4 => Self::AddPrice {
                exponent: i32::from_le_bytes(take::<4>(data, 8)?),
                price_type: u32::from_le_bytes(take::<4>(data, 12)?),
            },
            5 => Self::AddPublisher { publisher: Pubkey::new_from_array(take::<32>(data, 8)?) },
            6 => Self::DelPublisher { publisher: Pubkey::new_from_array(take::<32>(data, 8)?) },
            12 => Self::SetMinPublishers { min_publishers: take::<1>(data, 8)?[0] },
            15 => Self::DelPrice,
            16 => Self::DelProduct,
            other => return Err(InstructionError::UnknownCommand(other)),
        };
        Ok(ix)
    }
}

fn take<const N: usize>(data: &[u8], at: usize) -> Result<[u8; N], InstructionError> {
    let slice = data
        .get(at..at + N)
        .ok_or(InstructionError::TooShort { len: data.len(), need: at + N })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn oracle_metas(funding_key: &Pubkey, accounts: &[Pubkey]) -> Vec<AccountMeta> {
    let mut metas = Vec::with_capacity(accounts.len() + 1);
    metas.push(AccountMeta::new(*funding_key, true));
    metas.extend(accounts.iter().map(|k| AccountMeta::new(*k, true)));
    metas
}

fn fixed_ix(program_key: &Pubkey, funding_key: &Pubkey, accounts: &[Pubkey], ix: OracleInstruction) -> Instruction {
    let mut data = ix.header();
    ix.write_fixed_payload(&mut data);
    Instruction { program_id: *program_key, accounts: oracle_metas(funding_key, accounts), data }
}

/// accounts: funding (s, w), mapping (s, w)
pub fn init_mapping(program_key: &Pubkey, funding_key: &Pubkey, mapping_key: &Pubkey) -> Instruction {
    fixed_ix(program_key, funding_key, &[*mapping_key], OracleInstruction::InitMapping)
}

/// accounts: funding (s, w), current tail mapping (s, w), new mapping (s, w)
pub fn add_mapping(program_key: &Pubkey, funding_key: &Pubkey, tail_key: &Pubkey, mapping_key: &Pubkey) -> Instruction {
    fixed_ix(program_key, funding_key, &[*tail_key, *mapping_key], OracleInstruction::AddMapping)
}

/// accounts: funding (s, w), mapping (s, w), product (s, w)
pub fn add_product(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    mapping_key: &Pubkey,
    product_key: &Pubkey,
) -> Instruction {
    fixed_ix(program_key, funding_key, &[*mapping_key, *product_key], OracleInstruction::AddProduct)
}

/// accounts: funding (s, w), product (s, w)
pub fn update_product(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    product_key: &Pubkey,
    metadata: &ProductMetadata,
) -> Result<Instruction, EncodingError> {
    let data = OracleInstruction::UpdateProduct { metadata: metadata.clone() }.pack()?;
    Ok(Instruction { program_id: *program_key, accounts: oracle_metas(funding_key, &[*product_key]), data })
}

/// accounts: funding (s, w), product (s, w), price (s, w)
pub fn add_price(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    product_key: &Pubkey,
    price_key: &Pubkey,
    exponent: i32,
) -> Instruction {
    fixed_ix(
        program_key,
        funding_key,
        &[*product_key, *price_key],
        OracleInstruction::AddPrice { exponent, price_type: PRICE_TYPE_PRICE },
    )
}

/// Enables (`add_publisher`) or disables (`del_publisher`) a publisher.
/// accounts: funding (s, w), price (s, w)
pub fn toggle_publisher(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    price_key: &Pubkey,
    publisher_key: &Pubkey,
    enable: bool,
) -> Instruction {
    let ix = if enable {
        OracleInstruction::AddPublisher { publisher: *publisher_key }
    } else {
        OracleInstruction::DelPublisher { publisher: *publisher_key }
    };
    fixed_ix(program_key, funding_key, &[*price_key], ix)
}

/// accounts: funding (s, w), price (s, w)
pub fn set_minimum_publishers(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    price_key: &Pubkey,
    value: u8,
) -> Instruction {
    fixed_ix(program_key, funding_key, &[*price_key], OracleInstruction::SetMinPublishers { min_publishers: value })
}

/// accounts: funding (s, w), product (s, w), price (s, w)
pub fn delete_price(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    product_key: &Pubkey,
    price_key: &Pubkey,
) -> Instruction {
    fixed_ix(program_key, funding_key, &[*product_key, *price_key], OracleInstruction::DelPrice)
}

/// accounts: funding (s, w), mapping (s, w), product (s, w)
pub fn delete_product(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    mapping_key: &Pubkey,
    product_key: &Pubkey,
) -> Instruction {
    fixed_ix(program_key, funding_key, &[*mapping_key, *product_key], OracleInstruction::DelProduct)
}

/// System-program allocation of an account owned by the oracle program.
pub fn create_account(
    program_key: &Pubkey,
    funding_key: &Pubkey,
    new_key: &Pubkey,
    lamports: u64,
    space: usize,
) -> Instruction {
    system_instruction::create_account(funding_key, new_key, lamports, space as u64, program_key)
}

/// Anchor `propose`: hands the program's upgrade authority to the escrow,
/// to be accepted later by `new_authority`.
pub fn propose_upgrade_authority(
    current_authority: &Pubkey,
    new_authority: &Pubkey,
    program_key: &Pubkey,
) -> Instruction {
    let (escrow_authority, _) = Pubkey::find_program_address(
        &[current_authority.as_ref(), new_authority.as_ref()],
        &AUTHORITY_ESCROW_PROGRAM_ID,
    );
    let (program_data, _) = Pubkey::find_program_address(&[program_key.as_ref()], &bpf_loader_upgradeable::id());
    let data = hashv(&[b"global:propose"]).to_bytes()[..8].to_vec();
    Instruction {
        program_id: AUTHORITY_ESCROW_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*current_authority, true),
            AccountMeta::new_readonly(*new_authority, false),
            AccountMeta::new_readonly(escrow_authority, false),
            AccountMeta::new_readonly(*program_key, false),
            AccountMeta::new(program_data, false),
            AccountMeta::new_readonly(bpf_loader_upgradeable::id(), false),
        ],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_payloads() {
        let program = Pubkey::new_unique();
        let funding = Pubkey::new_unique();
        let price = Pubkey::new_unique();

        let ix = set_minimum_publishers(&program, &funding, &price, 5);
        assert_eq!(ix.data, vec![2, 0, 0, 0, 12, 0, 0, 0, 5, 0, 0, 0]);
        assert_eq!(ix.accounts, vec![AccountMeta::new(funding, true), AccountMeta::new(price, true)]);

        let product = Pubkey::new_unique();
        let ix = add_price(&program, &funding, &product, &price, -8);
        assert_eq!(&ix.data[..8], &[2, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(&ix.data[8..12], &(-8i32).to_le_bytes());
        assert_eq!(&ix.data[12..], &1u32.to_le_bytes());
        assert!(ix.accounts.iter().all(|m| m.is_signer && m.is_writable));
    }

    #[test]
    fn toggle_selects_command() {
        let (program, funding, price, publisher) =
            (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let on = toggle_publisher(&program, &funding, &price, &publisher, true);
        let off = toggle_publisher(&program, &funding, &price, &publisher, false);
        assert_eq!(OracleInstruction::unpack(&on.data).unwrap(), OracleInstruction::AddPublisher { publisher });
        assert_eq!(OracleInstruction::unpack(&off.data).unwrap(), OracleInstruction::DelPublisher { publisher });
        assert_eq!(on.data.len(), 40);
    }

    #[test]
    fn fixed_encoder_agrees_with_pack() {
        let all = [
            OracleInstruction::InitMapping,
            OracleInstruction::AddMapping,
            OracleInstruction::AddProduct,
            OracleInstruction::AddPrice { exponent: -5, price_type: PRICE_TYPE_PRICE },
            OracleInstruction::AddPublisher { publisher: Pubkey::new_unique() },
            OracleInstruction::DelPublisher { publisher: Pubkey::new_unique() },
            OracleInstruction::SetMinPublishers { min_publishers: 3 },
            OracleInstruction::DelPrice,
            OracleInstruction::DelProduct,
        ];
        let (program, funding) = (Pubkey::new_unique(), Pubkey::new_unique());
        for ix in all {
            let packed = ix.pack().unwrap();
            assert_eq!(fixed_ix(&program, &funding, &[], ix.clone()).data, packed, "{}", ix.name());
            assert_eq!(OracleInstruction::unpack(&packed).unwrap(), ix);
        }
    }

    #[test]
    fn update_product_rejects_oversized_metadata() {
        let (program, funding, product) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let long = "x".repeat(200);
        let md: ProductMetadata = [("a", long.as_str()), ("b", long.as_str()), ("c", long.as_str())]
            .into_iter()
            .collect();
        assert!(matches!(
            update_product(&program, &funding, &product, &md),
            Err(EncodingError::TooLarge { capacity: PRODUCT_METADATA_CAPACITY, .. })
        ));

        let md: ProductMetadata = [("symbol", "FX.EUR/USD")].into_iter().collect();
        let ix = update_product(&program, &funding, &product, &md).unwrap();
        assert_eq!(OracleInstruction::unpack(&ix.data).unwrap(), OracleInstruction::UpdateProduct { metadata: md });
    }

    #[test]
    fn unpack_errors() {
        assert_eq!(OracleInstruction::unpack(&[2, 0]), Err(InstructionError::TooShort { len: 2, need: 4 }));
        assert_eq!(OracleInstruction::unpack(&[1, 0, 0, 0, 0, 0, 0, 0]), Err(InstructionError::BadVersion(1)));
        assert_eq!(
            OracleInstruction::unpack(&[2, 0, 0, 0, 99, 0, 0, 0]),
            Err(InstructionError::UnknownCommand(99))
        );
    }

    #[test]
    fn propose_uses_anchor_discriminator() {
        let (current, new, program) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ix = propose_upgrade_authority(&current, &new, &program);
        assert_eq!(ix.program_id, AUTHORITY_ESCROW_PROGRAM_ID);
        assert_eq!(ix.data, hashv(&[b"global:propose"]).to_bytes()[..8].to_vec());
        assert_eq!(ix.accounts.len(), 6);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts.iter().filter(|m| m.is_signer).count(), 1);
    }

    #[test]
    fn create_account_is_owned_by_program() {
        let (program, funding, new) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ix = create_account(&program, &funding, &new, 1_000, 512);
        assert_eq!(ix.program_id, solana_sdk::system_program::id());
        assert!(ix.accounts.iter().all(|m| m.is_signer));
    }
}
