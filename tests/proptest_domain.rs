//! Property-Based Tests — Accounting Invariants
//!
//! Uses `proptest` to verify that positions, bank totals and token
//! custody stay consistent across random deposit and withdraw sequences.

use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use margin_bootstrap::adapters::ledger::InMemoryLedger;
use margin_bootstrap::domain::amount::ui_amount;
use margin_bootstrap::domain::{Bank, Keypair, LedgerIdentity, MarginAccount, TokenPosition};
use margin_bootstrap::error::Error;
use margin_bootstrap::usecases::steps::{BankStep, GroupStep, MarginAccountStep, OracleStep};
use margin_bootstrap::usecases::{MarginExecutor, Provisioner};

const PROGRAM: LedgerIdentity = LedgerIdentity::new([0x5A; 32]);
const MINT: LedgerIdentity = LedgerIdentity::new([0x10; 32]);
const FAUCET: u64 = 1_000_000;

struct Setup {
    ledger: Arc<InMemoryLedger>,
    owner: Keypair,
    payer: Keypair,
    account: MarginAccount,
    bank: Bank,
    wallet: LedgerIdentity,
}

fn setup() -> Setup {
    tokio_test::block_on(async {
        let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
        let admin = Keypair::from_seed(&[1; 32]);
        let payer = Keypair::from_seed(&[2; 32]);
        let owner = Keypair::from_seed(&[3; 32]);
        let provisioner = Provisioner::new(Arc::clone(&ledger));

        let group = provisioner
            .provision(&GroupStep {
                admin: &admin,
                payer: &payer,
                group_num: 0,
            })
            .await
            .unwrap()
            .into_inner();
        let oracle = provisioner
            .provision(&OracleStep {
                group: &group,
                admin: &admin,
                payer: &payer,
                mint: MINT,
                price: dec!(1),
            })
            .await
            .unwrap()
            .into_inner();
        let bank = provisioner
            .provision(&BankStep {
                group: &group,
                admin: &admin,
                payer: &payer,
                mint: MINT,
                oracle: oracle.address,
                decimals: 6,
                token_index: None,
                reserved: &[],
            })
            .await
            .unwrap()
            .into_inner();
        let account = provisioner
            .provision(&MarginAccountStep {
                group: &group,
                owner: &owner,
                payer: &payer,
                account_num: 0,
                name: "prop",
            })
            .await
            .unwrap()
            .into_inner();
        let wallet = ledger.airdrop_tokens(owner.identity(), MINT, FAUCET);

        Setup {
            ledger,
            owner,
            payer,
            account,
            bank,
            wallet,
        }
    })
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Deposit(u64),
    Withdraw(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..50_000).prop_map(Op::Deposit),
        (1u64..50_000).prop_map(Op::Withdraw),
    ]
}

// ── Position Arithmetic ─────────────────────────────────────

proptest! {
    /// A position is either a deposit or a borrow, never both.
    #[test]
    fn position_is_deposit_or_borrow(native in any::<i64>()) {
        let position = TokenPosition { token_index: 0, native };
        prop_assert!(position.deposit() == 0 || position.borrow() == 0);
        prop_assert_eq!(
            i128::from(position.deposit()) - i128::from(position.borrow()),
            i128::from(native)
        );
    }

    /// UI amounts scale native amounts by exactly 10^decimals.
    #[test]
    fn ui_amount_scales_by_decimals(native in -1_000_000_000_000i64..1_000_000_000_000, decimals in 0u8..=12) {
        let ui = ui_amount(i128::from(native), decimals);
        let scale = Decimal::from(10u64.pow(u32::from(decimals)));
        prop_assert_eq!(ui * scale, Decimal::from(native));
    }
}

// ── Deposit / Withdraw Sequences ────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Without borrowing, positions never go negative, bank totals match
    /// the single depositor's position, and tokens are conserved between
    /// the wallet and the vault.
    #[test]
    fn no_borrow_sequences_conserve_tokens(ops in prop::collection::vec(op(), 1..12)) {
        let s = setup();
        let executor = MarginExecutor::new(Arc::clone(&s.ledger));
        let mut expected: u64 = 0;

        for op in ops {
            let result = tokio_test::block_on(async {
                match op {
                    Op::Deposit(amount) => {
                        executor
                            .deposit(&s.account, &s.bank, s.wallet, &s.owner, &s.payer, amount)
                            .await
                    }
                    Op::Withdraw(amount) => {
                        executor
                            .withdraw(&s.account, &s.bank, s.wallet, &s.owner, &s.payer, amount, false)
                            .await
                    }
                }
            });

            match (op, result) {
                (Op::Deposit(amount), Ok(_)) => expected += amount,
                (Op::Withdraw(amount), Ok(_)) => {
                    prop_assert!(amount <= expected);
                    expected -= amount;
                }
                (Op::Withdraw(amount), Err(Error::InsufficientBalance { available, requested, .. })) => {
                    prop_assert!(amount > expected);
                    prop_assert_eq!(available, expected);
                    prop_assert_eq!(requested, amount);
                }
                (op, Err(e)) => prop_assert!(false, "{op:?} failed unexpectedly: {e}"),
            }
        }

        let balance = tokio_test::block_on(executor.balance(&s.account.address, &s.bank.address)).unwrap();
        prop_assert_eq!(balance.native_position, i64::try_from(expected).unwrap());
        prop_assert_eq!(balance.bank_deposits, expected);
        prop_assert_eq!(balance.bank_borrows, 0);

        let wallet = s.ledger.token_account(&s.wallet).unwrap().amount;
        let vault = s.ledger.token_account(&s.bank.vault).unwrap().amount;
        prop_assert_eq!(vault, expected);
        prop_assert_eq!(wallet + vault, FAUCET);
    }

    /// A rejected withdraw leaves the ledger exactly as it was.
    #[test]
    fn rejected_withdraw_changes_nothing(deposit in 1u64..10_000, excess in 1u64..10_000) {
        let s = setup();
        let executor = MarginExecutor::new(Arc::clone(&s.ledger));

        tokio_test::block_on(executor.deposit(&s.account, &s.bank, s.wallet, &s.owner, &s.payer, deposit)).unwrap();
        let submits = s.ledger.submit_count();
        let account_before = s.ledger.account(&s.account.address);

        let result = tokio_test::block_on(executor.withdraw(
            &s.account,
            &s.bank,
            s.wallet,
            &s.owner,
            &s.payer,
            deposit + excess,
            false,
        ));

        let is_insufficient = matches!(result, Err(Error::InsufficientBalance { .. }));
        prop_assert!(is_insufficient);
        prop_assert_eq!(s.ledger.submit_count(), submits);
        prop_assert_eq!(s.ledger.account(&s.account.address), account_before);
    }
}
