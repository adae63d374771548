//! Transactions and their signatures.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::LedgerIdentity;
use super::instruction::Instruction;
use super::signer::{verify_signature, Keypair, SignatureBytes, SigningError};

/// An unsigned transaction message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identity funding the transaction fee. Always a required signer.
    pub fee_payer: LedgerIdentity,
    /// Instructions applied atomically in order.
    pub instructions: Vec<Instruction>,
    /// Makes otherwise identical messages distinct.
    pub nonce: Uuid,
}

impl Transaction {
    /// Build a transaction with a fresh nonce.
    pub fn new(fee_payer: LedgerIdentity, instructions: Vec<Instruction>) -> Self {
        Self {
            fee_payer,
            instructions,
            nonce: Uuid::new_v4(),
        }
    }

    /// Bytes covered by the signatures.
    pub fn message_bytes(&self) -> Result<Vec<u8>, SigningError> {
        serde_json::to_vec(self).map_err(|e| SigningError::Encode(e.to_string()))
    }

    /// Fee payer plus every instruction authority, deduplicated.
    pub fn required_signers(&self) -> BTreeSet<LedgerIdentity> {
        std::iter::once(self.fee_payer)
            .chain(self.instructions.iter().map(Instruction::authority))
            .collect()
    }

    /// Sign with `signers`. Every required signer must be present.
    pub fn sign(self, signers: &[&Keypair]) -> Result<SignedTransaction, SigningError> {
        let message = self.message_bytes()?;
        let mut signatures = Vec::with_capacity(signers.len());
        let mut seen = BTreeSet::new();
        for keypair in signers {
            let signer = keypair.identity();
            if seen.insert(signer) {
                signatures.push(TxSignature {
                    signer,
                    signature: keypair.sign(&message),
                });
            }
        }
        if let Some(missing) = self.required_signers().difference(&seen).next() {
            return Err(SigningError::MissingSignature(*missing));
        }
        // Fee payer signature first: it doubles as the transaction id.
        signatures.sort_by_key(|s| s.signer != self.fee_payer);
        Ok(SignedTransaction {
            message: self,
            signatures,
        })
    }
}

/// One signer's signature over a transaction message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub signer: LedgerIdentity,
    pub signature: SignatureBytes,
}

/// A transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub message: Transaction,
    pub signatures: Vec<TxSignature>,
}

impl SignedTransaction {
    /// Transaction id: the fee payer's signature.
    pub fn id(&self) -> String {
        self.signatures
            .first()
            .map(|s| s.signature.to_string())
            .unwrap_or_default()
    }

    /// Verify every signature and return the set of verified signers.
    ///
    /// Fails if any signature is invalid or a required signer is missing.
    pub fn verified_signers(&self) -> Result<BTreeSet<LedgerIdentity>, SigningError> {
        let message = self.message.message_bytes()?;
        let mut verified = BTreeSet::new();
        for sig in &self.signatures {
            verify_signature(&sig.signer, &message, &sig.signature)?;
            verified.insert(sig.signer);
        }
        if let Some(missing) = self.message.required_signers().difference(&verified).next() {
            return Err(SigningError::MissingSignature(*missing));
        }
        Ok(verified)
    }
}

/// Confirmation returned once a transaction is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub signature: String,
    pub slot: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_tx(admin: &Keypair, payer: &Keypair) -> Transaction {
        Transaction::new(
            payer.identity(),
            vec![Instruction::CreateGroup {
                admin: admin.identity(),
                group_num: 0,
            }],
        )
    }

    #[test]
    fn test_sign_requires_authority_and_fee_payer() {
        let admin = Keypair::from_seed(&[1u8; 32]);
        let payer = Keypair::from_seed(&[2u8; 32]);

        let err = group_tx(&admin, &payer).sign(&[&payer]).unwrap_err();
        assert_eq!(err, SigningError::MissingSignature(admin.identity()));

        let err = group_tx(&admin, &payer).sign(&[&admin]).unwrap_err();
        assert_eq!(err, SigningError::MissingSignature(payer.identity()));

        let signed = group_tx(&admin, &payer).sign(&[&admin, &payer]).unwrap();
        assert_eq!(signed.signatures[0].signer, payer.identity());
        assert_eq!(signed.verified_signers().unwrap().len(), 2);
    }

    #[test]
    fn test_tampered_message_fails_verification() {
        let admin = Keypair::from_seed(&[1u8; 32]);
        let payer = Keypair::from_seed(&[2u8; 32]);
        let mut signed = group_tx(&admin, &payer).sign(&[&admin, &payer]).unwrap();

        signed.message.instructions = vec![Instruction::CreateGroup {
            admin: admin.identity(),
            group_num: 7,
        }];
        assert!(matches!(
            signed.verified_signers(),
            Err(SigningError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_duplicate_signers_sign_once() {
        let admin = Keypair::from_seed(&[1u8; 32]);
        let signed = group_tx(&admin, &admin).sign(&[&admin, &admin]).unwrap();
        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.id(), signed.signatures[0].signature.to_string());
    }
}
