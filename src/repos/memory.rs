//! An in-memory ledger used to exercise services without a database.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    transactions::{in_lock_order, replacement_effects},
    AccountPersistenceError, AccountRepo, CategoryPersistenceError, CategoryRepo, PostingError,
    TransactionRepo,
};
use crate::ledger::domain::{
    accounts::{Account, AccountChanges, NewAccount},
    categories::{Category, CategoryData},
    transactions::{BalanceEffect, NewTransaction, Transaction, TransactionFilter},
    Entity,
};

fn matches(filter: &TransactionFilter, transaction: &Transaction) -> bool {
    filter
        .transaction_type
        .map_or(true, |t| transaction.transaction_type == t)
        && filter.account_id.map_or(true, |id| {
            transaction.account_id == id || transaction.related_account_id == Some(id)
        })
        && filter
            .main_category
            .map_or(true, |c| transaction.main_category == c)
        && filter.period.map_or(true, |p| p.contains(transaction.date))
}

#[derive(Clone, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    categories: HashMap<Uuid, Category>,
    transactions: HashMap<Uuid, Transaction>,
}

impl State {
    fn apply_effect(&mut self, user_id: &str, effect: &BalanceEffect) -> Result<(), PostingError> {
        let account = self
            .accounts
            .get_mut(&effect.account_id)
            .filter(|account| account.user_id == user_id)
            .ok_or(PostingError::NotFound(Entity::Account(effect.account_id)))?;

        let balance = account
            .balance
            .checked_add(effect.delta)
            .ok_or_else(|| anyhow!("balance of account {} is out of range", effect.account_id))?;
        if effect.requires_funds && balance < Decimal::ZERO {
            return Err(PostingError::InsufficientBalance {
                account_id: effect.account_id,
            });
        }

        account.balance = balance;

        Ok(())
    }

    fn owned_transaction(&self, user_id: &str, id: Uuid) -> Result<Transaction, PostingError> {
        self.transactions
            .get(&id)
            .filter(|transaction| transaction.user_id == user_id)
            .cloned()
            .ok_or(PostingError::NotFound(Entity::Transaction(id)))
    }
}

/// Implements every repository over shared in-memory state.
///
/// Writes operate on a copy of the state that only replaces the original when
/// the whole write succeeds, mirroring a database transaction.
#[derive(Clone, Default)]
pub(crate) struct MemoryLedger {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl MemoryLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every repository call take at least `latency`.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn balance(&self, account_id: Uuid) -> Option<Decimal> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .accounts
            .get(&account_id)
            .map(|account| account.balance)
    }

    pub(crate) fn transaction_count(&self) -> usize {
        self.state
            .lock()
            .expect("state lock poisoned")
            .transactions
            .len()
    }

    async fn wait(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let state = self.state.lock().expect("state lock poisoned");

        f(&*state)
    }

    fn write<T, E>(&self, f: impl FnOnce(&mut State) -> Result<T, E>) -> Result<T, E> {
        let mut state = self.state.lock().expect("state lock poisoned");
        let mut draft = state.clone();

        let result = f(&mut draft)?;
        *state = draft;

        Ok(result)
    }
}

#[async_trait]
impl AccountRepo for MemoryLedger {
    async fn create_account(
        &self,
        account: &NewAccount,
    ) -> Result<Account, AccountPersistenceError> {
        self.wait().await;

        self.write(|state| {
            if state
                .accounts
                .values()
                .any(|a| a.user_id == account.user_id() && a.name == account.name())
            {
                return Err(AccountPersistenceError::DuplicateName(
                    account.name().to_owned(),
                ));
            }

            let created = Account {
                id: Uuid::new_v4(),
                user_id: account.user_id().to_owned(),
                name: account.name().to_owned(),
                account_type: account.account_type(),
                currency: account.currency().to_owned(),
                balance: account.opening_balance(),
                created_at: Utc::now(),
            };
            state.accounts.insert(created.id, created.clone());

            Ok(created)
        })
    }

    async fn get_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> anyhow::Result<Option<Account>> {
        self.wait().await;

        Ok(self.read(|state| {
            state
                .accounts
                .get(&account_id)
                .filter(|account| account.user_id == user_id)
                .cloned()
        }))
    }

    async fn list_accounts(&self, user_id: &str) -> anyhow::Result<Vec<Account>> {
        self.wait().await;

        let mut accounts = self.read(|state| {
            state
                .accounts
                .values()
                .filter(|account| account.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>()
        });
        accounts.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(accounts)
    }

    async fn update_account(
        &self,
        user_id: &str,
        account_id: Uuid,
        changes: &AccountChanges,
    ) -> Result<Account, AccountPersistenceError> {
        self.wait().await;

        self.write(|state| {
            if let Some(name) = &changes.name {
                if state.accounts.values().any(|a| {
                    a.id != account_id && a.user_id == user_id && &a.name == name
                }) {
                    return Err(AccountPersistenceError::DuplicateName(name.clone()));
                }
            }

            let account = state
                .accounts
                .get_mut(&account_id)
                .filter(|account| account.user_id == user_id)
                .ok_or(AccountPersistenceError::NotFound(account_id))?;

            if let Some(name) = &changes.name {
                account.name = name.clone();
            }
            if let Some(account_type) = changes.account_type {
                account.account_type = account_type;
            }
            if let Some(currency) = &changes.currency {
                account.currency = currency.clone();
            }

            Ok(account.clone())
        })
    }

    async fn delete_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Account, AccountPersistenceError> {
        self.wait().await;

        self.write(|state| {
            if !state
                .accounts
                .get(&account_id)
                .map_or(false, |account| account.user_id == user_id)
            {
                return Err(AccountPersistenceError::NotFound(account_id));
            }

            if state.transactions.values().any(|t| {
                t.account_id == account_id || t.related_account_id == Some(account_id)
            }) {
                return Err(AccountPersistenceError::InUse(account_id));
            }

            state
                .accounts
                .remove(&account_id)
                .ok_or(AccountPersistenceError::NotFound(account_id))
        })
    }

    async fn net_worth(&self, user_id: &str) -> anyhow::Result<Decimal> {
        self.wait().await;

        Ok(self.read(|state| {
            state
                .accounts
                .values()
                .filter(|account| account.user_id == user_id)
                .map(|account| account.balance)
                .sum()
        }))
    }
}

#[async_trait]
impl CategoryRepo for MemoryLedger {
    async fn create_category(
        &self,
        user_id: &str,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError> {
        self.wait().await;

        self.write(|state| {
            if state
                .categories
                .values()
                .any(|c| c.user_id == user_id && c.name == data.name)
            {
                return Err(CategoryPersistenceError::DuplicateName(data.name.clone()));
            }

            let category = Category {
                id: Uuid::new_v4(),
                user_id: user_id.to_owned(),
                name: data.name.clone(),
                main_category: data.main_category,
                created_at: Utc::now(),
            };
            state.categories.insert(category.id, category.clone());

            Ok(category)
        })
    }

    async fn get_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> anyhow::Result<Option<Category>> {
        self.wait().await;

        Ok(self.read(|state| {
            state
                .categories
                .get(&category_id)
                .filter(|category| category.user_id == user_id)
                .cloned()
        }))
    }

    async fn list_categories(&self, user_id: &str) -> anyhow::Result<Vec<Category>> {
        self.wait().await;

        let mut categories = self.read(|state| {
            state
                .categories
                .values()
                .filter(|category| category.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>()
        });
        categories.sort_by(|a, b| {
            (a.main_category.as_str(), &a.name).cmp(&(b.main_category.as_str(), &b.name))
        });

        Ok(categories)
    }

    async fn update_category(
        &self,
        user_id: &str,
        category_id: Uuid,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError> {
        self.wait().await;

        self.write(|state| {
            if state.categories.values().any(|c| {
                c.id != category_id && c.user_id == user_id && c.name == data.name
            }) {
                return Err(CategoryPersistenceError::DuplicateName(data.name.clone()));
            }

            let category = state
                .categories
                .get_mut(&category_id)
                .filter(|category| category.user_id == user_id)
                .ok_or(CategoryPersistenceError::NotFound(category_id))?;

            category.name = data.name.clone();
            category.main_category = data.main_category;

            Ok(category.clone())
        })
    }

    async fn delete_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, CategoryPersistenceError> {
        self.wait().await;

        self.write(|state| {
            let category = state
                .categories
                .get(&category_id)
                .filter(|category| category.user_id == user_id)
                .cloned()
                .ok_or(CategoryPersistenceError::NotFound(category_id))?;

            state.categories.remove(&category_id);
            for transaction in state.transactions.values_mut() {
                if transaction.category_id == Some(category_id) {
                    transaction.category_id = None;
                }
            }

            Ok(category)
        })
    }

    async fn seed_categories(
        &self,
        user_id: &str,
        categories: &[CategoryData],
    ) -> anyhow::Result<u64> {
        self.wait().await;

        self.write(|state| {
            let mut inserted = 0;

            for data in categories {
                if state
                    .categories
                    .values()
                    .any(|c| c.user_id == user_id && c.name == data.name)
                {
                    continue;
                }

                let category = Category {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_owned(),
                    name: data.name.clone(),
                    main_category: data.main_category,
                    created_at: Utc::now(),
                };
                state.categories.insert(category.id, category);
                inserted += 1;
            }

            Ok(inserted)
        })
    }
}

#[async_trait]
impl TransactionRepo for MemoryLedger {
    async fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError> {
        self.wait().await;

        self.write(|state| {
            for effect in in_lock_order(transaction.balance_effects()?) {
                state.apply_effect(transaction.user_id(), &effect)?;
            }

            let persisted = transaction
                .clone()
                .into_transaction(Uuid::new_v4(), Utc::now());
            state.transactions.insert(persisted.id, persisted.clone());

            Ok(persisted)
        })
    }

    async fn replace_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError> {
        self.wait().await;

        self.write(|state| {
            let existing = state.owned_transaction(user_id, transaction_id)?;

            for effect in replacement_effects(&existing, transaction)? {
                state.apply_effect(user_id, &effect)?;
            }

            let replaced = transaction
                .clone()
                .into_transaction(transaction_id, existing.created_at);
            state.transactions.insert(transaction_id, replaced.clone());

            Ok(replaced)
        })
    }

    async fn delete_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, PostingError> {
        self.wait().await;

        self.write(|state| {
            let existing = state.owned_transaction(user_id, transaction_id)?;

            for effect in in_lock_order(existing.balance_effects()?) {
                state.apply_effect(user_id, &effect.reversed())?;
            }
            state.transactions.remove(&transaction_id);

            Ok(existing)
        })
    }

    async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> anyhow::Result<Option<Transaction>> {
        self.wait().await;

        Ok(self.read(|state| state.owned_transaction(user_id, transaction_id).ok()))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> anyhow::Result<Vec<Transaction>> {
        self.wait().await;

        let mut transactions = self.read(|state| {
            state
                .transactions
                .values()
                .filter(|t| t.user_id == user_id && matches(filter, t))
                .cloned()
                .collect::<Vec<_>>()
        });
        transactions.sort_by(|a, b| (b.date, b.created_at).cmp(&(a.date, a.created_at)));

        if let Some(limit) = filter.limit {
            transactions.truncate(limit as usize);
        }

        Ok(transactions)
    }

    async fn reset_owner(&self, user_id: &str) -> anyhow::Result<()> {
        self.wait().await;

        self.write(|state| {
            state.transactions.retain(|_, t| t.user_id != user_id);
            state.categories.retain(|_, c| c.user_id != user_id);
            state.accounts.retain(|_, a| a.user_id != user_id);

            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::ledger::domain::{
        accounts::{AccountType, NewAccountData},
        categories::MainCategory,
        currency::Conversion,
        transactions::{TransactionData, TransactionType, ValidTransactionData},
    };

    const OWNER: &str = "owner";

    async fn account(ledger: &MemoryLedger, name: &str, opening_balance: Decimal) -> Account {
        let account = NewAccount::from_data(
            OWNER,
            NewAccountData {
                name: name.to_owned(),
                account_type: AccountType::Bank,
                currency: "SEK".to_owned(),
                opening_balance,
            },
        )
        .expect("account should be valid");

        ledger
            .create_account(&account)
            .await
            .expect("account should be created")
    }

    async fn category(ledger: &MemoryLedger) -> Category {
        ledger
            .create_category(
                OWNER,
                &CategoryData {
                    name: "Groceries".to_owned(),
                    main_category: MainCategory::Needs,
                },
            )
            .await
            .expect("category should be created")
    }

    fn posting(data: TransactionData, category: &Category) -> NewTransaction {
        let data = ValidTransactionData::validate(data).expect("data should be valid");

        NewTransaction::new(
            OWNER,
            data,
            category,
            "SEK".to_owned(),
            Conversion::unavailable(),
            Utc::now(),
        )
    }

    fn expense(amount: Decimal, account: &Account, category: &Category) -> TransactionData {
        TransactionData {
            description: "Groceries".to_owned(),
            amount,
            currency: None,
            date: None,
            category_id: category.id,
            account_id: account.id,
            related_account_id: None,
            transaction_type: TransactionType::Expense,
            fees: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn insert_rechecks_funds_and_writes_nothing() {
        let ledger = MemoryLedger::new();
        let checking = account(&ledger, "Checking", dec!(100)).await;
        let category = category(&ledger).await;

        let error = ledger
            .insert_transaction(&posting(expense(dec!(150), &checking, &category), &category))
            .await
            .expect_err("expense should exceed the balance");

        assert!(matches!(
            error,
            PostingError::InsufficientBalance { account_id } if account_id == checking.id
        ));
        assert_eq!(Some(dec!(100)), ledger.balance(checking.id));
        assert_eq!(0, ledger.transaction_count());
    }

    #[tokio::test]
    async fn failed_effect_rolls_back_earlier_effects() {
        let ledger = MemoryLedger::new();
        let checking = account(&ledger, "Checking", dec!(100)).await;
        let category = category(&ledger).await;
        // Sorts after every other account, so the debit is applied first.
        let missing = Uuid::from_u128(u128::MAX);

        let transfer = TransactionData {
            related_account_id: Some(missing),
            transaction_type: TransactionType::Transfer,
            fees: dec!(1),
            ..expense(dec!(40), &checking, &category)
        };

        let error = ledger
            .insert_transaction(&posting(transfer, &category))
            .await
            .expect_err("destination should be missing");

        assert!(matches!(
            error,
            PostingError::NotFound(Entity::Account(id)) if id == missing
        ));
        assert_eq!(Some(dec!(100)), ledger.balance(checking.id));
        assert_eq!(0, ledger.transaction_count());
    }

    #[tokio::test]
    async fn replace_rechecks_funds_after_reversal() {
        let ledger = MemoryLedger::new();
        let checking = account(&ledger, "Checking", dec!(100)).await;
        let category = category(&ledger).await;

        let original = ledger
            .insert_transaction(&posting(expense(dec!(50), &checking, &category), &category))
            .await
            .expect("expense should post");

        let error = ledger
            .replace_transaction(
                OWNER,
                original.id,
                &posting(expense(dec!(200), &checking, &category), &category),
            )
            .await
            .expect_err("replacement should exceed the balance");

        let stored = ledger
            .get_transaction(OWNER, original.id)
            .await
            .expect("lookup should succeed");

        assert!(matches!(error, PostingError::InsufficientBalance { .. }));
        assert_eq!(Some(dec!(50)), ledger.balance(checking.id));
        assert_eq!(Some(original), stored);
    }

    #[tokio::test]
    async fn balance_overflow_is_an_error() {
        let ledger = MemoryLedger::new();
        let checking = account(&ledger, "Checking", Decimal::MAX).await;
        let category = category(&ledger).await;

        let income = TransactionData {
            transaction_type: TransactionType::Income,
            ..expense(dec!(1), &checking, &category)
        };

        let error = ledger
            .insert_transaction(&posting(income, &category))
            .await
            .expect_err("balance should overflow");

        assert!(matches!(error, PostingError::Other(_)));
        assert_eq!(Some(Decimal::MAX), ledger.balance(checking.id));
        assert_eq!(0, ledger.transaction_count());
    }
}
