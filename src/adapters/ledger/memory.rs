//! In-Memory Ledger - Simulated LedgerClient
//!
//! Holds every account in process memory and executes transactions with
//! the simulated margin program. Used for dry runs, tests and benches.
//!
//! Transactions are applied to a copy of the state and committed only if
//! every instruction succeeds, so a rejected transaction changes nothing.
//! Faults can be queued to exercise transport failures, including the
//! ambiguous case where a transaction commits but its confirmation is
//! lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::identity::associated_token_address;
use crate::domain::{
    AccountFilter, AccountState, ExternalAccount, LedgerIdentity, ResourceKind, SignedTransaction,
    SigningError, TxReceipt,
};
use crate::ports::ledger::{LedgerClient, LedgerError, ProgramError};

use super::program::{LedgerState, TokenAccount};

/// A failure injected into the next matching ledger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next read fails with a transport error.
    ReadTransport,
    /// Next submit fails with a transport error before reaching the program.
    SubmitTransport,
    /// Next submit is applied, then reported as a transport timeout.
    CommitThenTimeout,
}

impl Fault {
    fn is_read(self) -> bool {
        matches!(self, Self::ReadTransport)
    }
}

/// In-process ledger implementing [`LedgerClient`].
pub struct InMemoryLedger {
    program_id: LedgerIdentity,
    state: RwLock<LedgerState>,
    faults: Mutex<VecDeque<Fault>>,
    submits: AtomicU64,
    creations: AtomicU64,
}

impl InMemoryLedger {
    /// Create an empty ledger for the given margin program.
    pub fn new(program_id: LedgerIdentity) -> Self {
        Self {
            program_id,
            state: RwLock::new(LedgerState::default()),
            faults: Mutex::new(VecDeque::new()),
            submits: AtomicU64::new(0),
            creations: AtomicU64::new(0),
        }
    }

    /// Mint `amount` tokens into `owner`'s associated token account,
    /// creating it if needed. Returns the token account address.
    pub fn airdrop_tokens(
        &self,
        owner: LedgerIdentity,
        mint: LedgerIdentity,
        amount: u64,
    ) -> LedgerIdentity {
        let address = associated_token_address(&owner, &mint);
        let mut state = self.write();
        let account = state
            .token_accounts
            .entry(address)
            .or_insert(TokenAccount {
                owner,
                mint,
                amount: 0,
            });
        account.amount = account.amount.saturating_add(amount);
        debug!(owner = %owner, mint = %mint, amount, "Airdropped tokens");
        address
    }

    /// Register an account owned by another program (e.g. an external
    /// price feed).
    pub fn register_external_account(&self, address: LedgerIdentity) {
        self.insert_account(AccountState::External(ExternalAccount { address }));
    }

    /// Insert or overwrite an account directly, bypassing the program.
    pub fn insert_account(&self, account: AccountState) {
        self.write().accounts.insert(account.address(), account);
    }

    /// Current state of an account.
    pub fn account(&self, address: &LedgerIdentity) -> Option<AccountState> {
        self.read().accounts.get(address).cloned()
    }

    /// Current state of a token account.
    pub fn token_account(&self, address: &LedgerIdentity) -> Option<TokenAccount> {
        self.read().token_accounts.get(address).cloned()
    }

    /// Number of program accounts (token accounts excluded).
    pub fn account_count(&self) -> usize {
        self.read().accounts.len()
    }

    /// Queue a fault for the next matching call.
    pub fn inject_fault(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fault);
    }

    /// Transactions applied so far.
    pub fn submit_count(&self) -> u64 {
        self.submits.load(Ordering::Relaxed)
    }

    /// Creation instructions applied so far.
    pub fn creation_count(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_fault(&self, read: bool) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let position = faults.iter().position(|f| f.is_read() == read)?;
        faults.remove(position)
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        match self.take_fault(true) {
            Some(fault) => Err(LedgerError::Transport(format!("injected {fault:?}"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn program_id(&self) -> LedgerIdentity {
        self.program_id
    }

    async fn get_account(&self, address: &LedgerIdentity) -> Result<Option<AccountState>, LedgerError> {
        self.check_read()?;
        Ok(self.account(address))
    }

    async fn find_accounts(
        &self,
        kind: ResourceKind,
        filters: &[AccountFilter],
    ) -> Result<Vec<AccountState>, LedgerError> {
        self.check_read()?;
        Ok(self
            .read()
            .accounts
            .values()
            .filter(|state| state.kind() == Some(kind) && filters.iter().all(|f| state.matches(f)))
            .cloned()
            .collect())
    }

    async fn token_balance(&self, token_account: &LedgerIdentity) -> Result<Option<u64>, LedgerError> {
        self.check_read()?;
        Ok(self.token_account(token_account).map(|a| a.amount))
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<TxReceipt, LedgerError> {
        let fault = self.take_fault(false);
        if fault == Some(Fault::SubmitTransport) {
            warn!("Injected transport failure before submit");
            return Err(LedgerError::Transport("connection reset".to_string()));
        }

        transaction.verified_signers().map_err(|err| match err {
            SigningError::InvalidSignature(signer) | SigningError::MissingSignature(signer) => {
                LedgerError::Rejected(ProgramError::MissingSignature { signer })
            }
            other => LedgerError::Decode(other.to_string()),
        })?;

        let slot = {
            let mut state = self.write();
            let mut next = state.clone();
            for ix in &transaction.message.instructions {
                next.execute(&self.program_id, ix)?;
            }
            next.slot += 1;
            *state = next;
            state.slot
        };

        let created = transaction
            .message
            .instructions
            .iter()
            .filter(|ix| ix.creates().is_some())
            .count() as u64;
        self.submits.fetch_add(1, Ordering::Relaxed);
        self.creations.fetch_add(created, Ordering::Relaxed);
        debug!(signature = %transaction.id(), slot, "Transaction applied");

        if fault == Some(Fault::CommitThenTimeout) {
            warn!("Injected timeout after commit");
            return Err(LedgerError::Transport("confirmation timed out".to_string()));
        }
        Ok(TxReceipt {
            signature: transaction.id(),
            slot,
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
