//! Simulated Margin Program - Instruction Execution
//!
//! Applies instructions to an in-memory account set with the same
//! constraints the on-ledger program enforces: derived-address
//! uniqueness, group administration, dependency existence, one bank per
//! mint and per token index, and the withdraw/borrow rules. Interest,
//! health and liquidation math are not modelled.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::identity::{
    find_bank_address, find_group_address, find_margin_account_address, find_open_orders_address,
    find_spot_market_address, find_stub_oracle_address, find_vault_address,
};
use crate::domain::{
    AccountState, Bank, Group, Instruction, LedgerIdentity, MarginAccount, Market, OpenOrders,
    OpenOrdersSlot, Oracle, Resource, TokenPosition,
};
use crate::ports::ledger::ProgramError;

/// SPL-style token account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    pub owner: LedgerIdentity,
    pub mint: LedgerIdentity,
    pub amount: u64,
}

/// Every account the simulated ledger holds.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub accounts: BTreeMap<LedgerIdentity, AccountState>,
    pub token_accounts: HashMap<LedgerIdentity, TokenAccount>,
    pub slot: u64,
}

impl LedgerState {
    /// Apply one instruction. On error `self` may be partially modified;
    /// callers execute against a copy and commit only on success.
    pub fn execute(
        &mut self,
        program_id: &LedgerIdentity,
        ix: &Instruction,
    ) -> Result<(), ProgramError> {
        match ix {
            Instruction::CreateGroup { admin, group_num } => {
                let address = find_group_address(admin, *group_num, program_id);
                self.ensure_vacant(address)?;
                self.accounts.insert(
                    address,
                    AccountState::Group(Group {
                        address,
                        admin: *admin,
                        group_num: *group_num,
                    }),
                );
            }
            Instruction::CreateStubOracle {
                group,
                admin,
                mint,
                price,
            } => {
                self.administered_group(group, admin)?;
                if price.is_sign_negative() || price.is_zero() {
                    return Err(invalid("oracle price must be positive"));
                }
                let address = find_stub_oracle_address(group, mint, program_id);
                self.ensure_vacant(address)?;
                self.accounts.insert(
                    address,
                    AccountState::Oracle(Oracle {
                        address,
                        group: *group,
                        mint: *mint,
                        price: *price,
                    }),
                );
            }
            Instruction::RegisterToken {
                group,
                admin,
                mint,
                oracle,
                token_index,
                decimals,
            } => {
                self.administered_group(group, admin)?;
                match self.accounts.get(oracle) {
                    None => return Err(ProgramError::AccountNotFound { address: *oracle }),
                    Some(AccountState::Oracle(o)) if o.group != *group => {
                        return Err(ProgramError::WrongAccount {
                            address: *oracle,
                            expected: Oracle::KIND,
                        });
                    }
                    Some(_) => {}
                }
                if let Some(existing) = self.banks(group).find(|b| b.mint == *mint) {
                    return Err(ProgramError::AccountAlreadyInUse {
                        address: existing.address,
                    });
                }
                let address = find_bank_address(group, *token_index, program_id);
                if self.accounts.contains_key(&address) {
                    return Err(ProgramError::TokenIndexInUse {
                        token_index: *token_index,
                    });
                }
                let vault = find_vault_address(group, *token_index, program_id);
                self.token_accounts.insert(
                    vault,
                    TokenAccount {
                        owner: address,
                        mint: *mint,
                        amount: 0,
                    },
                );
                self.accounts.insert(
                    address,
                    AccountState::Bank(Bank {
                        address,
                        group: *group,
                        mint: *mint,
                        oracle: *oracle,
                        vault,
                        token_index: *token_index,
                        decimals: *decimals,
                        native_deposits: 0,
                        native_borrows: 0,
                    }),
                );
            }
            Instruction::CreateMarginAccount {
                group,
                owner,
                account_num,
                name,
            } => {
                self.load::<Group>(group)?;
                let address = find_margin_account_address(group, owner, *account_num, program_id);
                self.ensure_vacant(address)?;
                self.accounts.insert(
                    address,
                    AccountState::MarginAccount(MarginAccount {
                        address,
                        group: *group,
                        owner: *owner,
                        account_num: *account_num,
                        name: name.clone(),
                        tokens: Vec::new(),
                        open_orders: Vec::new(),
                    }),
                );
            }
            Instruction::RegisterSpotMarket {
                group,
                admin,
                program,
                external_market,
                base_bank,
                quote_bank,
                market_index,
            } => {
                self.administered_group(group, admin)?;
                let base = self.load_in_group::<Bank>(base_bank, group, |b| b.group)?;
                let quote = self.load_in_group::<Bank>(quote_bank, group, |b| b.group)?;
                if base.token_index == quote.token_index {
                    return Err(invalid("base and quote banks must differ"));
                }
                for market in self.markets(group) {
                    if market.base_token_index == base.token_index
                        && market.quote_token_index == quote.token_index
                    {
                        return Err(ProgramError::AccountAlreadyInUse {
                            address: market.address,
                        });
                    }
                    if market.market_index == *market_index {
                        return Err(invalid(format!(
                            "market index {market_index} already registered"
                        )));
                    }
                }
                let address = find_spot_market_address(group, external_market, program_id);
                self.ensure_vacant(address)?;
                self.accounts.insert(
                    address,
                    AccountState::Market(Market {
                        address,
                        group: *group,
                        base_bank: base.address,
                        quote_bank: quote.address,
                        base_token_index: base.token_index,
                        quote_token_index: quote.token_index,
                        market_index: *market_index,
                        program: *program,
                        external_market: *external_market,
                    }),
                );
            }
            Instruction::CreateOpenOrders {
                group,
                account,
                market,
                owner,
            } => {
                let mut margin = self.owned_account(account, group, owner)?;
                let market = self.load_in_group::<Market>(market, group, |m| m.group)?;
                let address = find_open_orders_address(account, &market.address, program_id);
                self.ensure_vacant(address)?;
                margin.open_orders.push(OpenOrdersSlot {
                    market_index: market.market_index,
                    open_orders: address,
                });
                self.accounts
                    .insert(margin.address, AccountState::MarginAccount(margin));
                self.accounts.insert(
                    address,
                    AccountState::OpenOrders(OpenOrders {
                        address,
                        group: *group,
                        account: *account,
                        market: market.address,
                        owner: *owner,
                    }),
                );
            }
            Instruction::Deposit {
                group,
                account,
                bank,
                token_account,
                owner,
                amount,
            } => {
                if *amount == 0 {
                    return Err(invalid("deposit amount must be positive"));
                }
                let margin = self.owned_account(account, group, owner)?;
                let bank = self.load_in_group::<Bank>(bank, group, |b| b.group)?;
                let source = self.token_account(token_account, &bank)?;
                if source.owner != *owner {
                    return Err(ProgramError::Unauthorized {
                        signer: *owner,
                        account: *token_account,
                    });
                }
                if source.amount < *amount {
                    return Err(ProgramError::InsufficientFunds {
                        account: *token_account,
                        available: source.amount,
                        requested: *amount,
                    });
                }
                let delta = i64::try_from(*amount).map_err(|_| invalid("amount overflows"))?;
                self.transfer(token_account, &bank.vault, *amount)?;
                self.change_position(margin, bank, delta)?;
            }
            Instruction::Withdraw {
                group,
                account,
                bank,
                token_account,
                owner,
                amount,
                allow_borrow,
            } => {
                if *amount == 0 {
                    return Err(invalid("withdraw amount must be positive"));
                }
                let margin = self.owned_account(account, group, owner)?;
                let bank = self.load_in_group::<Bank>(bank, group, |b| b.group)?;
                self.token_account(token_account, &bank)?;
                let available = margin.native_deposit(&bank);
                if !allow_borrow && *amount > available {
                    return Err(ProgramError::InsufficientBalance {
                        available,
                        requested: *amount,
                    });
                }
                let liquidity = self.token_account(&bank.vault, &bank)?.amount;
                if liquidity < *amount {
                    return Err(ProgramError::InsufficientLiquidity {
                        available: liquidity,
                        requested: *amount,
                    });
                }
                let delta = i64::try_from(*amount).map_err(|_| invalid("amount overflows"))?;
                self.transfer(&bank.vault, token_account, *amount)?;
                self.change_position(margin, bank, -delta)?;
            }
            Instruction::CloseMarginAccount {
                group,
                account,
                owner,
            } => {
                let margin = self.owned_account(account, group, owner)?;
                if !margin.is_empty() {
                    return Err(ProgramError::AccountNotEmpty {
                        address: margin.address,
                    });
                }
                self.accounts.remove(account);
            }
        }
        Ok(())
    }

    fn ensure_vacant(&self, address: LedgerIdentity) -> Result<(), ProgramError> {
        if self.accounts.contains_key(&address) {
            return Err(ProgramError::AccountAlreadyInUse { address });
        }
        Ok(())
    }

    fn load<R: Resource>(&self, address: &LedgerIdentity) -> Result<R, ProgramError> {
        let state = self
            .accounts
            .get(address)
            .cloned()
            .ok_or(ProgramError::AccountNotFound { address: *address })?;
        R::from_state(state).ok_or(ProgramError::WrongAccount {
            address: *address,
            expected: R::KIND,
        })
    }

    fn load_in_group<R: Resource>(
        &self,
        address: &LedgerIdentity,
        group: &LedgerIdentity,
        group_of: impl Fn(&R) -> LedgerIdentity,
    ) -> Result<R, ProgramError> {
        let resource = self.load::<R>(address)?;
        if group_of(&resource) != *group {
            return Err(ProgramError::WrongAccount {
                address: *address,
                expected: R::KIND,
            });
        }
        Ok(resource)
    }

    fn administered_group(
        &self,
        group: &LedgerIdentity,
        admin: &LedgerIdentity,
    ) -> Result<Group, ProgramError> {
        let loaded = self.load::<Group>(group)?;
        if loaded.admin != *admin {
            return Err(ProgramError::Unauthorized {
                signer: *admin,
                account: *group,
            });
        }
        Ok(loaded)
    }

    fn owned_account(
        &self,
        account: &LedgerIdentity,
        group: &LedgerIdentity,
        owner: &LedgerIdentity,
    ) -> Result<MarginAccount, ProgramError> {
        let margin = self.load_in_group::<MarginAccount>(account, group, |a| a.group)?;
        if margin.owner != *owner {
            return Err(ProgramError::Unauthorized {
                signer: *owner,
                account: *account,
            });
        }
        Ok(margin)
    }

    fn token_account(
        &self,
        address: &LedgerIdentity,
        bank: &Bank,
    ) -> Result<&TokenAccount, ProgramError> {
        let account = self
            .token_accounts
            .get(address)
            .ok_or(ProgramError::AccountNotFound { address: *address })?;
        if account.mint != bank.mint {
            return Err(invalid(format!(
                "token account {address} does not hold the bank's mint"
            )));
        }
        Ok(account)
    }

    fn transfer(
        &mut self,
        from: &LedgerIdentity,
        to: &LedgerIdentity,
        amount: u64,
    ) -> Result<(), ProgramError> {
        let source = self
            .token_accounts
            .get_mut(from)
            .ok_or(ProgramError::AccountNotFound { address: *from })?;
        source.amount = source
            .amount
            .checked_sub(amount)
            .ok_or(ProgramError::InsufficientFunds {
                account: *from,
                available: source.amount,
                requested: amount,
            })?;
        let dest = self
            .token_accounts
            .get_mut(to)
            .ok_or(ProgramError::AccountNotFound { address: *to })?;
        dest.amount = dest
            .amount
            .checked_add(amount)
            .ok_or_else(|| invalid("token amount overflows"))?;
        Ok(())
    }

    /// Shift an account's position by `delta` and keep the bank's
    /// deposit and borrow totals in step.
    fn change_position(
        &mut self,
        mut margin: MarginAccount,
        mut bank: Bank,
        delta: i64,
    ) -> Result<(), ProgramError> {
        let before = margin
            .position(bank.token_index)
            .copied()
            .unwrap_or(TokenPosition {
                token_index: bank.token_index,
                native: 0,
            });
        let after = TokenPosition {
            token_index: bank.token_index,
            native: before
                .native
                .checked_add(delta)
                .ok_or_else(|| invalid("position overflows"))?,
        };

        bank.native_deposits = bank
            .native_deposits
            .saturating_sub(before.deposit())
            .checked_add(after.deposit())
            .ok_or_else(|| invalid("bank deposits overflow"))?;
        bank.native_borrows = bank
            .native_borrows
            .saturating_sub(before.borrow())
            .checked_add(after.borrow())
            .ok_or_else(|| invalid("bank borrows overflow"))?;

        match margin
            .tokens
            .iter_mut()
            .find(|p| p.token_index == bank.token_index)
        {
            Some(position) => *position = after,
            None => margin.tokens.push(after),
        }
        self.accounts
            .insert(margin.address, AccountState::MarginAccount(margin));
        self.accounts.insert(bank.address, AccountState::Bank(bank));
        Ok(())
    }

    fn banks<'a>(&'a self, group: &'a LedgerIdentity) -> impl Iterator<Item = &'a Bank> + 'a {
        self.accounts.values().filter_map(move |state| match state {
            AccountState::Bank(b) if b.group == *group => Some(b),
            _ => None,
        })
    }

    fn markets<'a>(&'a self, group: &'a LedgerIdentity) -> impl Iterator<Item = &'a Market> + 'a {
        self.accounts.values().filter_map(move |state| match state {
            AccountState::Market(m) if m.group == *group => Some(m),
            _ => None,
        })
    }
}

fn invalid(reason: impl Into<String>) -> ProgramError {
    ProgramError::InvalidInstruction {
        reason: reason.into(),
    }
}
