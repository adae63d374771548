//! Ledger identities and program-derived addresses.
//!
//! Every on-ledger account (group, oracle, bank, margin account, market,
//! open orders, token account) is addressed by a 32-byte identity rendered
//! as base58. Resource addresses are derived deterministically from their
//! scope seeds, so the same scope always maps to the same address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker appended to every derivation so derived addresses never collide
/// with signer public keys produced from the same bytes.
const DERIVED_ADDRESS_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Seed for [`Group`](super::resource::Group) accounts.
pub const GROUP_SEED: &[u8] = b"Group";

/// Seed for stub [`Oracle`](super::resource::Oracle) accounts.
pub const STUB_ORACLE_SEED: &[u8] = b"StubOracle";

/// Seed for [`Bank`](super::resource::Bank) accounts.
pub const BANK_SEED: &[u8] = b"Bank";

/// Seed for bank custody vaults.
pub const VAULT_SEED: &[u8] = b"Vault";

/// Seed for [`MarginAccount`](super::resource::MarginAccount) accounts.
pub const MARGIN_ACCOUNT_SEED: &[u8] = b"MarginAccount";

/// Seed for spot [`Market`](super::resource::Market) registrations.
pub const SPOT_MARKET_SEED: &[u8] = b"SpotMarket";

/// Seed for [`OpenOrders`](super::resource::OpenOrders) sub-accounts.
pub const OPEN_ORDERS_SEED: &[u8] = b"OpenOrders";

/// SPL token program.
pub const TOKEN_PROGRAM_ID: LedgerIdentity = LedgerIdentity([
    6, 221, 246, 225, 215, 101, 161, 147, 217, 203, 225, 70, 206, 235, 121, 172, 28, 180, 133,
    237, 95, 91, 55, 145, 58, 140, 245, 133, 126, 255, 0, 169,
]);

/// SPL associated token account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: LedgerIdentity = LedgerIdentity([
    140, 151, 37, 143, 78, 36, 137, 241, 187, 61, 16, 41, 20, 142, 13, 131, 11, 90, 19, 153, 218,
    255, 16, 132, 4, 142, 123, 216, 219, 233, 248, 89,
]);

/// Opaque, globally unique address of an on-ledger account.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LedgerIdentity([u8; 32]);

impl LedgerIdentity {
    /// Wrap raw address bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes.
    pub const fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Borrow the raw address bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for LedgerIdentity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for LedgerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for LedgerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerIdentity({self})")
    }
}

/// Error returned when a base58 string is not a valid identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdentityError {
    /// Not valid base58.
    #[error("invalid base58: {0}")]
    Encoding(String),
    /// Decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for LedgerIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ParseIdentityError::Encoding(e.to_string()))?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseIdentityError::Length(len))?;
        Ok(Self(bytes))
    }
}

impl Serialize for LedgerIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LedgerIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Derive an address from seeds under the given program.
///
/// Seeds are length-prefixed before hashing so `["ab", "c"]` and
/// `["a", "bc"]` never derive the same address.
pub fn derive_address(seeds: &[&[u8]], program_id: &LedgerIdentity) -> LedgerIdentity {
    let mut hasher = hmac_sha256::Hash::new();
    for seed in seeds {
        hasher.update((seed.len() as u32).to_le_bytes());
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(DERIVED_ADDRESS_MARKER);
    LedgerIdentity(hasher.finalize())
}

/// Find the address of the group owned by `admin`.
pub fn find_group_address(
    admin: &LedgerIdentity,
    group_num: u32,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[GROUP_SEED, admin.as_ref(), &group_num.to_le_bytes()],
        program_id,
    )
}

/// Find the address of the stub oracle for `mint` in `group`.
pub fn find_stub_oracle_address(
    group: &LedgerIdentity,
    mint: &LedgerIdentity,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(&[STUB_ORACLE_SEED, group.as_ref(), mint.as_ref()], program_id)
}

/// Find the address of the bank holding `token_index` in `group`.
pub fn find_bank_address(
    group: &LedgerIdentity,
    token_index: u16,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[BANK_SEED, group.as_ref(), &token_index.to_le_bytes()],
        program_id,
    )
}

/// Find the address of the custody vault of the bank at `token_index`.
pub fn find_vault_address(
    group: &LedgerIdentity,
    token_index: u16,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[VAULT_SEED, group.as_ref(), &token_index.to_le_bytes()],
        program_id,
    )
}

/// Find the address of `owner`'s margin account number `account_num`.
pub fn find_margin_account_address(
    group: &LedgerIdentity,
    owner: &LedgerIdentity,
    account_num: u32,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[
            MARGIN_ACCOUNT_SEED,
            group.as_ref(),
            owner.as_ref(),
            &account_num.to_le_bytes(),
        ],
        program_id,
    )
}

/// Find the address of the spot market registration for `external_market`.
pub fn find_spot_market_address(
    group: &LedgerIdentity,
    external_market: &LedgerIdentity,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[SPOT_MARKET_SEED, group.as_ref(), external_market.as_ref()],
        program_id,
    )
}

/// Find the address of the open orders sub-account for (`account`, `market`).
pub fn find_open_orders_address(
    account: &LedgerIdentity,
    market: &LedgerIdentity,
    program_id: &LedgerIdentity,
) -> LedgerIdentity {
    derive_address(
        &[OPEN_ORDERS_SEED, account.as_ref(), market.as_ref()],
        program_id,
    )
}

/// Find the associated token account of `owner` for `mint`.
pub fn associated_token_address(owner: &LedgerIdentity, mint: &LedgerIdentity) -> LedgerIdentity {
    derive_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> LedgerIdentity {
        LedgerIdentity::new([byte; 32])
    }

    #[test]
    fn test_base58_roundtrip_of_well_known_program() {
        let parsed: LedgerIdentity = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".parse().unwrap();
        assert_eq!(parsed, TOKEN_PROGRAM_ID);
        assert_eq!(
            TOKEN_PROGRAM_ID.to_string(),
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = "3yZe7d".parse::<LedgerIdentity>().unwrap_err();
        assert!(matches!(err, ParseIdentityError::Length(_)));
        assert!("0OIl".parse::<LedgerIdentity>().is_err());
    }

    #[test]
    fn test_derivation_is_deterministic_and_scoped() {
        let program = id(9);
        let a = find_bank_address(&id(1), 0, &program);
        assert_eq!(a, find_bank_address(&id(1), 0, &program));
        assert_ne!(a, find_bank_address(&id(1), 1, &program));
        assert_ne!(a, find_bank_address(&id(2), 0, &program));
        assert_ne!(a, find_bank_address(&id(1), 0, &id(10)));
        assert_ne!(a, find_vault_address(&id(1), 0, &program));
    }

    #[test]
    fn test_seed_boundaries_matter() {
        let program = id(3);
        assert_ne!(
            derive_address(&[b"ab", b"c"], &program),
            derive_address(&[b"a", b"bc"], &program)
        );
    }

    #[test]
    fn test_serde_uses_base58_string() {
        let json = serde_json::to_string(&TOKEN_PROGRAM_ID).unwrap();
        assert_eq!(json, "\"TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA\"");
        let back: LedgerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TOKEN_PROGRAM_ID);
    }
}
