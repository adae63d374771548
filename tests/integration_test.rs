//! Integration Tests - End-to-end Provisioning and Margin Workflows
//!
//! Tests the interaction between usecases, ports, and adapters.
//! Uses mockall for ledger failure paths and the in-memory ledger for
//! full scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mockall::mock;
use mockall::predicate::*;
use rust_decimal_macros::dec;

use margin_bootstrap::adapters::ledger::InMemoryLedger;
use margin_bootstrap::domain::identity::find_group_address;
use margin_bootstrap::domain::{
    AccountFilter, AccountState, Bank, Group, Keypair, LedgerIdentity, MarginAccount, Oracle,
    ResourceKind, SignedTransaction, TxReceipt,
};
use margin_bootstrap::error::Error;
use margin_bootstrap::ports::ledger::{LedgerClient, LedgerError, ProgramError};
use margin_bootstrap::usecases::steps::{
    BankStep, GroupStep, MarginAccountStep, MarketStep, OracleStep,
};
use margin_bootstrap::usecases::{
    AccountPlan, AssetPlan, Bootstrap, BootstrapPlan, BootstrapSigners, BootstrapStep,
    MarginExecutor, MarketPlan, OracleSource, Provisioned, Provisioner,
};

// ---- Mock Definitions ----

mock! {
    pub Ledger {}

    #[async_trait::async_trait]
    impl LedgerClient for Ledger {
        fn program_id(&self) -> LedgerIdentity;

        async fn get_account(
            &self,
            address: &LedgerIdentity,
        ) -> Result<Option<AccountState>, LedgerError>;

        async fn find_accounts(
            &self,
            kind: ResourceKind,
            filters: &[AccountFilter],
        ) -> Result<Vec<AccountState>, LedgerError>;

        async fn token_balance(
            &self,
            token_account: &LedgerIdentity,
        ) -> Result<Option<u64>, LedgerError>;

        async fn submit(&self, transaction: &SignedTransaction) -> Result<TxReceipt, LedgerError>;

        async fn is_healthy(&self) -> bool;
    }
}

// ---- Fixtures ----

const PROGRAM: LedgerIdentity = LedgerIdentity::new([0xAA; 32]);
const USDC_MINT: LedgerIdentity = LedgerIdentity::new([0x10; 32]);
const BTC_MINT: LedgerIdentity = LedgerIdentity::new([0x11; 32]);
const BTC_ORACLE: LedgerIdentity = LedgerIdentity::new([0x21; 32]);
const BOOK_PROGRAM: LedgerIdentity = LedgerIdentity::new([0x30; 32]);
const BOOK_MARKET: LedgerIdentity = LedgerIdentity::new([0x31; 32]);

struct Signers {
    admin: Keypair,
    payer: Keypair,
    user: Keypair,
}

impl Signers {
    fn new() -> Self {
        Self {
            admin: Keypair::from_seed(&[1; 32]),
            payer: Keypair::from_seed(&[2; 32]),
            user: Keypair::from_seed(&[3; 32]),
        }
    }

    fn bootstrap(&self) -> BootstrapSigners<'_> {
        BootstrapSigners {
            admin: &self.admin,
            payer: &self.payer,
            user: &self.user,
        }
    }
}

fn plan() -> BootstrapPlan {
    BootstrapPlan {
        group_num: 0,
        assets: vec![
            AssetPlan {
                symbol: "USDC".into(),
                mint: USDC_MINT,
                decimals: 6,
                oracle: OracleSource::Stub { price: dec!(1) },
                token_index: None,
            },
            AssetPlan {
                symbol: "BTC".into(),
                mint: BTC_MINT,
                decimals: 6,
                oracle: OracleSource::External {
                    address: BTC_ORACLE,
                },
                token_index: None,
            },
        ],
        market: MarketPlan {
            base: "BTC".into(),
            quote: "USDC".into(),
            program: BOOK_PROGRAM,
            external_market: BOOK_MARKET,
            market_index: 0,
        },
        account: AccountPlan {
            account_num: 0,
            name: "main".into(),
        },
    }
}

fn memory_ledger() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
    ledger.register_external_account(BTC_ORACLE);
    ledger
}

fn group_state(admin: LedgerIdentity) -> AccountState {
    AccountState::Group(Group {
        address: find_group_address(&admin, 0, &PROGRAM),
        admin,
        group_num: 0,
    })
}

fn margin_state(byte: u8, owner: LedgerIdentity) -> AccountState {
    AccountState::MarginAccount(MarginAccount {
        address: LedgerIdentity::new([byte; 32]),
        group: LedgerIdentity::new([0x40; 32]),
        owner,
        account_num: u32::from(byte),
        name: "main".into(),
        tokens: Vec::new(),
        open_orders: Vec::new(),
    })
}

// ---- Provisioner against a mocked ledger ----

#[tokio::test]
async fn test_transport_failure_is_not_treated_as_not_found() {
    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    ledger
        .expect_find_accounts()
        .returning(|_, _| Err(LedgerError::Transport("connection refused".into())));
    ledger.expect_submit().never();

    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::new(ledger));
    let err = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_existing_resource_is_found_without_submitting() {
    let signers = Signers::new();
    let admin = signers.admin.identity();

    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    ledger
        .expect_find_accounts()
        .with(eq(ResourceKind::Group), always())
        .times(1)
        .returning(move |_, _| Ok(vec![group_state(admin)]));
    ledger.expect_submit().never();

    let provisioner = Provisioner::new(Arc::new(ledger));
    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            // Differs from the existing group; ignored on the found path.
            group_num: 7,
        })
        .await
        .unwrap();

    assert!(!group.was_created());
    assert_eq!(group.resource().group_num, 0);
}

#[tokio::test]
async fn test_two_matches_are_ambiguous() {
    let signers = Signers::new();
    let owner = signers.user.identity();

    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    ledger
        .expect_find_accounts()
        .returning(move |_, _| Ok(vec![margin_state(1, owner), margin_state(2, owner)]));
    ledger.expect_submit().never();

    let group = Group {
        address: LedgerIdentity::new([0x40; 32]),
        admin: signers.admin.identity(),
        group_num: 0,
    };
    let provisioner = Provisioner::new(Arc::new(ledger));
    let err = provisioner
        .provision(&MarginAccountStep {
            group: &group,
            owner: &signers.user,
            payer: &signers.payer,
            account_num: 0,
            name: "main",
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Ambiguous {
            kind: ResourceKind::MarginAccount,
            matches: 2,
            ..
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unknown_creation_outcome_relocates_instead_of_resubmitting() {
    let signers = Signers::new();
    let admin = signers.admin.identity();
    let lookups = Arc::new(AtomicUsize::new(0));

    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    let seen = Arc::clone(&lookups);
    ledger.expect_find_accounts().returning(move |_, _| {
        // Empty before the submit, present after it.
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![])
        } else {
            Ok(vec![group_state(admin)])
        }
    });
    ledger
        .expect_submit()
        .times(1)
        .returning(|_| Err(LedgerError::Transport("confirmation timed out".into())));

    let provisioner = Provisioner::new(Arc::new(ledger));
    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap();

    assert!(matches!(group, Provisioned::Created(_)));
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_lost_creation_race_uses_existing_resource() {
    let signers = Signers::new();
    let admin = signers.admin.identity();
    let lookups = Arc::new(AtomicUsize::new(0));

    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    let seen = Arc::clone(&lookups);
    ledger.expect_find_accounts().returning(move |_, _| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![])
        } else {
            Ok(vec![group_state(admin)])
        }
    });
    ledger.expect_submit().times(1).returning(move |_| {
        Err(LedgerError::Rejected(ProgramError::AccountAlreadyInUse {
            address: find_group_address(&admin, 0, &PROGRAM),
        }))
    });

    let provisioner = Provisioner::new(Arc::new(ledger));
    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap();

    assert!(matches!(group, Provisioned::Found(_)));
}

#[tokio::test]
async fn test_persistent_transport_failure_gives_up_after_attempts() {
    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    ledger.expect_find_accounts().returning(|_, _| Ok(vec![]));
    ledger
        .expect_submit()
        .times(2)
        .returning(|_| Err(LedgerError::Transport("connection reset".into())));

    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::new(ledger)).with_max_create_attempts(2);
    let err = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::OutcomeUnknown {
            kind: ResourceKind::Group,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_read_failure_before_submit_reports_resource_created_elsewhere_as_found() {
    let signers = Signers::new();
    let group = Group {
        address: LedgerIdentity::new([0x40; 32]),
        admin: signers.admin.identity(),
        group_num: 0,
    };
    let oracle = Oracle {
        address: LedgerIdentity::new([0x50; 32]),
        group: group.address,
        mint: USDC_MINT,
        price: dec!(1),
    };
    let lookups = Arc::new(AtomicUsize::new(0));

    let mut ledger = MockLedger::new();
    ledger.expect_program_id().return_const(PROGRAM);
    let seen = Arc::clone(&lookups);
    let existing = oracle.clone();
    ledger.expect_find_accounts().returning(move |_, _| {
        // Another process creates the oracle while the group read fails.
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![])
        } else {
            Ok(vec![AccountState::Oracle(existing.clone())])
        }
    });
    ledger
        .expect_get_account()
        .times(1)
        .returning(|_| Err(LedgerError::Transport("connection reset".into())));
    ledger.expect_submit().never();

    let provisioner = Provisioner::new(Arc::new(ledger));
    let found = provisioner
        .provision(&OracleStep {
            group: &group,
            admin: &signers.admin,
            payer: &signers.payer,
            mint: USDC_MINT,
            price: dec!(1),
        })
        .await
        .unwrap();

    assert_eq!(found, Provisioned::Found(oracle));
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
}

// ---- Full workflow against the in-memory ledger ----

#[tokio::test]
async fn test_bootstrap_provisions_every_resource() {
    let ledger = memory_ledger();
    let signers = Signers::new();

    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();

    // group, USDC oracle, two banks, account, market, open orders
    assert_eq!(outcome.created_count(), 7);
    assert_eq!(ledger.creation_count(), 7);
    assert!(outcome.oracles.contains_key("USDC"));
    assert!(!outcome.oracles.contains_key("BTC"));

    let usdc = outcome.bank("USDC").unwrap();
    let btc = outcome.bank("BTC").unwrap();
    assert_ne!(usdc.token_index, btc.token_index);
    assert_eq!(btc.oracle, BTC_ORACLE);

    let market = outcome.market.resource();
    assert_eq!(market.base_bank, btc.address);
    assert_eq!(market.quote_bank, usdc.address);
    assert_eq!(outcome.open_orders.resource().market, market.address);
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let bootstrap = Bootstrap::new(Arc::clone(&ledger));

    let first = bootstrap.run(&plan(), signers.bootstrap()).await.unwrap();
    let submits = ledger.submit_count();
    let second = bootstrap.run(&plan(), signers.bootstrap()).await.unwrap();

    assert_eq!(second.created_count(), 0);
    assert_eq!(ledger.submit_count(), submits);
    let addresses = |o: &margin_bootstrap::usecases::BootstrapOutcome| {
        o.entries().into_iter().map(|e| e.address).collect::<Vec<_>>()
    };
    assert_eq!(addresses(&first), addresses(&second));
}

#[tokio::test]
async fn test_deposit_then_partial_withdraw_leaves_difference() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();
    let wallet = ledger.airdrop_tokens(signers.user.identity(), USDC_MINT, 5_000);

    let executor = MarginExecutor::new(Arc::clone(&ledger));
    let account = outcome.margin_account.resource();
    let bank = outcome.bank("USDC").unwrap();

    let deposit = executor
        .deposit(account, bank, wallet, &signers.user, &signers.payer, 1000)
        .await
        .unwrap();
    assert_eq!(deposit.balance.native_position, 1000);
    assert_eq!(deposit.balance.bank_deposits, 1000);

    let withdraw = executor
        .withdraw(account, bank, wallet, &signers.user, &signers.payer, 500, false)
        .await
        .unwrap();
    assert_eq!(withdraw.balance.native_position, 500);
    assert_eq!(withdraw.balance.ui_position(), dec!(0.0005));
    assert_eq!(ledger.token_account(&wallet).unwrap().amount, 4_500);
    assert!(outcome.open_orders.was_created());
}

#[tokio::test]
async fn test_withdraw_beyond_deposit_fails_and_keeps_balance() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();
    let wallet = ledger.airdrop_tokens(signers.user.identity(), USDC_MINT, 5_000);
    let executor = MarginExecutor::new(Arc::clone(&ledger));
    let account = outcome.margin_account.resource();
    let bank = outcome.bank("USDC").unwrap();

    executor
        .deposit(account, bank, wallet, &signers.user, &signers.payer, 1000)
        .await
        .unwrap();
    let submits = ledger.submit_count();

    let err = executor
        .withdraw(account, bank, wallet, &signers.user, &signers.payer, 1500, false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::InsufficientBalance {
            available: 1000,
            requested: 1500,
            ..
        }
    ));
    assert_eq!(ledger.submit_count(), submits);
    let balance = executor.balance(&account.address, &bank.address).await.unwrap();
    assert_eq!(balance.native_position, 1000);
}

#[tokio::test]
async fn test_zero_amount_rejected_before_submit() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();
    let executor = MarginExecutor::new(Arc::clone(&ledger));
    let submits = ledger.submit_count();

    let err = executor
        .deposit(
            outcome.margin_account.resource(),
            outcome.bank("USDC").unwrap(),
            LedgerIdentity::new([0x55; 32]),
            &signers.user,
            &signers.payer,
            0,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidAmount));
    assert_eq!(ledger.submit_count(), submits);
}

#[tokio::test]
async fn test_borrow_allowed_withdraw_goes_negative() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();
    let group = outcome.group.resource();
    let bank = outcome.bank("USDC").unwrap();
    let executor = MarginExecutor::new(Arc::clone(&ledger));
    let provisioner = Provisioner::new(Arc::clone(&ledger));

    // A second depositor provides the liquidity the user borrows.
    let lender = provisioner
        .provision(&MarginAccountStep {
            group,
            owner: &signers.admin,
            payer: &signers.payer,
            account_num: 0,
            name: "lender",
        })
        .await
        .unwrap()
        .into_inner();
    let lender_wallet = ledger.airdrop_tokens(signers.admin.identity(), USDC_MINT, 2_000);
    executor
        .deposit(&lender, bank, lender_wallet, &signers.admin, &signers.payer, 2_000)
        .await
        .unwrap();

    let wallet = ledger.airdrop_tokens(signers.user.identity(), USDC_MINT, 1_000);
    let account = outcome.margin_account.resource();
    executor
        .deposit(account, bank, wallet, &signers.user, &signers.payer, 1_000)
        .await
        .unwrap();
    let result = executor
        .withdraw(account, bank, wallet, &signers.user, &signers.payer, 1_500, true)
        .await
        .unwrap();

    assert_eq!(result.balance.native_position, -500);
    assert_eq!(result.balance.bank_deposits, 2_000);
    assert_eq!(result.balance.bank_borrows, 500);
}

#[tokio::test]
async fn test_market_before_quote_bank_is_dependency_missing() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::clone(&ledger));

    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap()
        .into_inner();
    let base = provisioner
        .provision(&BankStep {
            group: &group,
            admin: &signers.admin,
            payer: &signers.payer,
            mint: BTC_MINT,
            oracle: BTC_ORACLE,
            decimals: 6,
            token_index: None,
            reserved: &[],
        })
        .await
        .unwrap()
        .into_inner();
    // Quote bank snapshot that was never registered.
    let quote = Bank {
        address: LedgerIdentity::new([0x77; 32]),
        token_index: 1,
        mint: USDC_MINT,
        ..base.clone()
    };
    let creations = ledger.creation_count();

    let err = provisioner
        .provision(&MarketStep {
            group: &group,
            admin: &signers.admin,
            payer: &signers.payer,
            base: &base,
            quote: &quote,
            program: BOOK_PROGRAM,
            external_market: BOOK_MARKET,
            market_index: 0,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DependencyMissing {
            kind: ResourceKind::Market,
            dependency: ResourceKind::Bank,
            ..
        }
    ));
    assert_eq!(ledger.creation_count(), creations);
}

#[tokio::test]
async fn test_bank_before_oracle_is_dependency_missing() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::clone(&ledger));
    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap()
        .into_inner();

    let err = provisioner
        .provision(&BankStep {
            group: &group,
            admin: &signers.admin,
            payer: &signers.payer,
            mint: USDC_MINT,
            oracle: LedgerIdentity::new([0x99; 32]),
            decimals: 6,
            token_index: None,
            reserved: &[],
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DependencyMissing {
            dependency: ResourceKind::Oracle,
            ..
        }
    ));
}

#[tokio::test]
async fn test_plan_market_with_unknown_asset_fails_at_market_step() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let mut plan = plan();
    plan.market.quote = "ETH".into();

    let err = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan, signers.bootstrap())
        .await
        .unwrap_err();

    assert_eq!(err.step, BootstrapStep::Market("BTC/ETH".into()));
    assert!(matches!(err.source, Error::DependencyMissing { .. }));
    // Everything before the market stays provisioned.
    assert!(ledger.creation_count() >= 5);
}

#[tokio::test]
async fn test_found_oracle_keeps_its_original_price() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::clone(&ledger));
    let group = provisioner
        .provision(&GroupStep {
            admin: &signers.admin,
            payer: &signers.payer,
            group_num: 0,
        })
        .await
        .unwrap()
        .into_inner();

    let step = |price| OracleStep {
        group: &group,
        admin: &signers.admin,
        payer: &signers.payer,
        mint: USDC_MINT,
        price,
    };
    provisioner.provision(&step(dec!(1))).await.unwrap();
    let again = provisioner.provision(&step(dec!(2))).await.unwrap();

    assert!(!again.was_created());
    assert_eq!(again.resource().price, dec!(1));
}

#[tokio::test]
async fn test_concurrent_provisioning_of_one_key_creates_once() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::clone(&ledger));
    let step = GroupStep {
        admin: &signers.admin,
        payer: &signers.payer,
        group_num: 0,
    };

    let (a, b) = tokio::join!(provisioner.provision(&step), provisioner.provision(&step));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.resource(), b.resource());
    assert_eq!(u8::from(a.was_created()) + u8::from(b.was_created()), 1);
    assert_eq!(ledger.creation_count(), 1);
}

#[tokio::test]
async fn test_close_requires_zero_balance_confirmation() {
    let ledger = memory_ledger();
    let signers = Signers::new();
    let provisioner = Provisioner::new(Arc::clone(&ledger));
    let outcome = Bootstrap::new(Arc::clone(&ledger))
        .run(&plan(), signers.bootstrap())
        .await
        .unwrap();
    let group = outcome.group.resource();
    let bank = outcome.bank("USDC").unwrap();

    // Separate account without open orders.
    let account = provisioner
        .provision(&MarginAccountStep {
            group,
            owner: &signers.admin,
            payer: &signers.payer,
            account_num: 0,
            name: "scratch",
        })
        .await
        .unwrap()
        .into_inner();
    let wallet = ledger.airdrop_tokens(signers.admin.identity(), USDC_MINT, 1_000);
    let executor = MarginExecutor::new(Arc::clone(&ledger));
    executor
        .deposit(&account, bank, wallet, &signers.admin, &signers.payer, 1_000)
        .await
        .unwrap();

    let err = executor.confirm_zero_balances(&account.address).await.unwrap_err();
    assert!(matches!(err, Error::AccountNotEmpty(_)));

    executor
        .withdraw(&account, bank, wallet, &signers.admin, &signers.payer, 1_000, false)
        .await
        .unwrap();
    let confirmation = executor.confirm_zero_balances(&account.address).await.unwrap();
    executor
        .close_margin_account(confirmation, &signers.admin, &signers.payer)
        .await
        .unwrap();

    assert!(ledger.account(&account.address).is_none());
    // The bootstrapped user account holds open orders and cannot be confirmed.
    let err = executor
        .confirm_zero_balances(&outcome.margin_account.resource().address)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccountNotEmpty(_)));
}
