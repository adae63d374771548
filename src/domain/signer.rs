//! Signing identities.
//!
//! The workflow needs three key holders: the administrator, the fee payer
//! and the user. Each is an ed25519 keypair whose public key is its
//! [`LedgerIdentity`].

use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::identity::LedgerIdentity;

/// Errors raised while building or checking signatures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    /// Keypair bytes are malformed.
    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),
    /// A signature does not verify against its signer.
    #[error("invalid signature from {0}")]
    InvalidSignature(LedgerIdentity),
    /// A required signer did not sign.
    #[error("missing signature from {0}")]
    MissingSignature(LedgerIdentity),
    /// The message could not be encoded.
    #[error("encode: {0}")]
    Encode(String),
}

/// A 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Raw signature bytes.
    pub const fn to_bytes(self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Display for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({self})")
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = bs58::decode(&s)
            .into_vec()
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(bytes))
    }
}

/// An ed25519 signing keypair.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Build a keypair from its 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parse the 64-byte keypair layout (secret seed then public key).
    ///
    /// The trailing public key must match the one derived from the seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        if bytes.len() != 64 {
            return Err(SigningError::InvalidKeypair(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&seed);
        if keypair.identity().as_bytes() != &bytes[32..] {
            return Err(SigningError::InvalidKeypair(
                "public key does not match secret".to_string(),
            ));
        }
        Ok(keypair)
    }

    /// Serialize to the 64-byte keypair layout.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing.to_keypair_bytes()
    }

    /// Public identity of the keypair.
    pub fn identity(&self) -> LedgerIdentity {
        LedgerIdentity::new(self.signing.verifying_key().to_bytes())
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes(self.signing.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

/// Check `signature` over `message` against `signer`.
pub fn verify_signature(
    signer: &LedgerIdentity,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), SigningError> {
    let key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|_| SigningError::InvalidSignature(*signer))?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify(message, &signature)
        .map_err(|_| SigningError::InvalidSignature(*signer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_bytes_roundtrip() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let restored = Keypair::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(restored.identity(), keypair.identity());
    }

    #[test]
    fn test_keypair_rejects_mismatched_public_key() {
        let mut bytes = Keypair::from_seed(&[7u8; 32]).to_bytes();
        bytes[40] ^= 0xff;
        assert!(matches!(
            Keypair::from_bytes(&bytes),
            Err(SigningError::InvalidKeypair(_))
        ));
        assert!(Keypair::from_bytes(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_signature_verifies_only_for_signer_and_message() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let sig = alice.sign(b"deposit 1000");

        assert!(verify_signature(&alice.identity(), b"deposit 1000", &sig).is_ok());
        assert!(verify_signature(&bob.identity(), b"deposit 1000", &sig).is_err());
        assert!(verify_signature(&alice.identity(), b"deposit 9999", &sig).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let keypair = Keypair::from_seed(&[42u8; 32]);
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains(&keypair.identity().to_string()));
        assert!(!rendered.contains("42, 42"));
    }
}
