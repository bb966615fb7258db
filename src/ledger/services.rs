use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    categories::{CategoryLookupError, CategoryResolver},
    domain::{
        accounts::{Account, AccountChanges, AccountInvalidity, NewAccount, NewAccountData},
        categories::{self, Category, CategoryData},
        currency::{self, Conversion},
        period::{period_boundaries, PeriodError, SalaryMonth, DEFAULT_START_DAY},
        reports::BudgetSummary,
        transactions::{
            AmountOverflow, NewTransaction, Transaction, TransactionData, TransactionFilter,
            TransactionInvalidity, TransactionType, ValidTransactionData,
        },
        Entity,
    },
};
use crate::{
    exchange_rates::ExchangeRates,
    repos::{
        AccountPersistenceError, CategoryPersistenceError, DynAccountRepo, DynCategoryRepo,
        DynTransactionRepo, PostingError,
    },
};

/// How long a single ledger operation may take when nothing else is
/// configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("category {0} does not exist")]
    InvalidCategory(Uuid),

    #[error("insufficient balance in account {account_id}")]
    InsufficientBalance { account_id: Uuid },

    #[error("cannot transfer money from an account to itself")]
    SameAccountTransfer,

    #[error("a destination account is required")]
    MissingDestinationAccount,

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("transaction type {0} is not allowed here")]
    InvalidTransactionType(TransactionType),

    #[error(transparent)]
    InvalidPeriod(#[from] PeriodError),

    #[error("name must not be empty")]
    EmptyName,

    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("account {0} is referenced by transactions")]
    AccountInUse(Uuid),

    #[error("the name {0:?} is already in use")]
    DuplicateName(String),

    #[error("the operation timed out")]
    TimedOut,

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether the error was caused by the request itself, as opposed to the
    /// ledger failing to carry it out.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::TimedOut | Self::Persistence(_))
    }
}

impl From<PostingError> for LedgerError {
    fn from(error: PostingError) -> Self {
        match error {
            PostingError::NotFound(entity) => Self::NotFound(entity),
            PostingError::InsufficientBalance { account_id } => {
                Self::InsufficientBalance { account_id }
            }
            PostingError::OutOfRange(overflow) => overflow.into(),
            PostingError::Other(error) => Self::Persistence(error),
        }
    }
}

impl From<AccountPersistenceError> for LedgerError {
    fn from(error: AccountPersistenceError) -> Self {
        match error {
            AccountPersistenceError::DuplicateName(name) => Self::DuplicateName(name),
            AccountPersistenceError::NotFound(id) => Self::NotFound(Entity::Account(id)),
            AccountPersistenceError::InUse(id) => Self::AccountInUse(id),
            AccountPersistenceError::Other(error) => Self::Persistence(error),
        }
    }
}

impl From<CategoryPersistenceError> for LedgerError {
    fn from(error: CategoryPersistenceError) -> Self {
        match error {
            CategoryPersistenceError::DuplicateName(name) => Self::DuplicateName(name),
            CategoryPersistenceError::NotFound(id) => Self::NotFound(Entity::Category(id)),
            CategoryPersistenceError::Other(error) => Self::Persistence(error),
        }
    }
}

impl From<CategoryLookupError> for LedgerError {
    fn from(error: CategoryLookupError) -> Self {
        match error {
            CategoryLookupError::NotFound(id) => Self::InvalidCategory(id),
            CategoryLookupError::Other(error) => Self::Persistence(error),
        }
    }
}

impl From<AmountOverflow> for LedgerError {
    fn from(overflow: AmountOverflow) -> Self {
        Self::InvalidAmount(overflow.amount)
    }
}

impl From<AccountInvalidity> for LedgerError {
    fn from(invalidity: AccountInvalidity) -> Self {
        match invalidity {
            AccountInvalidity::EmptyName => Self::EmptyName,
            AccountInvalidity::InvalidCurrency(code) => Self::InvalidCurrency(code),
        }
    }
}

impl From<TransactionInvalidity> for LedgerError {
    fn from(invalidity: TransactionInvalidity) -> Self {
        match invalidity {
            TransactionInvalidity::InvalidAmount(amount) => Self::InvalidAmount(amount),
            TransactionInvalidity::NegativeFees(fees) => Self::InvalidAmount(fees),
            TransactionInvalidity::MissingDestination => Self::MissingDestinationAccount,
            TransactionInvalidity::SameAccount => Self::SameAccountTransfer,
            TransactionInvalidity::UnexpectedDestination(transaction_type) => {
                Self::InvalidTransactionType(transaction_type)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// The salary month used for budget summaries.
    pub salary_month: SalaryMonth,
    /// The day periods start on when listing transactions by period.
    pub period_start_day: u32,
    /// Upper bound for every ledger operation, including its database work.
    pub operation_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            salary_month: SalaryMonth::default(),
            period_start_day: DEFAULT_START_DAY,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Posts transactions and keeps account balances consistent with them.
///
/// Every operation is scoped to a single owner and bounded by the configured
/// operation timeout. An operation that times out is dropped along with any
/// database transaction it had open, which rolls the work back.
#[derive(Clone)]
pub struct LedgerService {
    account_repo: DynAccountRepo,
    category_repo: DynCategoryRepo,
    transaction_repo: DynTransactionRepo,
    categories: CategoryResolver,
    exchange_rates: Arc<ExchangeRates>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(
        account_repo: DynAccountRepo,
        category_repo: DynCategoryRepo,
        transaction_repo: DynTransactionRepo,
        exchange_rates: Arc<ExchangeRates>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            account_repo,
            categories: CategoryResolver::new(category_repo.clone()),
            category_repo,
            transaction_repo,
            exchange_rates,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.operation_timeout.as_millis() as u64,
                    "Ledger operation timed out."
                );

                Err(LedgerError::TimedOut)
            }
        }
    }

    async fn owned_account(&self, user_id: &str, account_id: Uuid) -> Result<Account, LedgerError> {
        self.account_repo
            .get_account(user_id, account_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Account(account_id)))
    }

    async fn owned_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, LedgerError> {
        self.transaction_repo
            .get_transaction(user_id, transaction_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Transaction(transaction_id)))
    }

    /// Load the accounts a validated transaction references.
    ///
    /// # Returns
    ///
    /// The source account. The destination is only checked for existence.
    async fn referenced_accounts(
        &self,
        user_id: &str,
        data: &ValidTransactionData,
    ) -> Result<Account, LedgerError> {
        let source = self.owned_account(user_id, data.account_id()).await?;

        if let Some(destination) = data.destination() {
            self.owned_account(user_id, destination).await?;
        }

        Ok(source)
    }

    /// Post a single account transaction.
    ///
    /// Transfers, and savings moved into another account, are handed to
    /// [`LedgerService::post_transfer`].
    ///
    /// # Arguments
    /// * `user_id` - The owner of the transaction.
    /// * `data` - The transaction to post.
    ///
    /// # Returns
    ///
    /// The persisted transaction. The source account's balance has been
    /// adjusted by the transaction's amount.
    pub async fn post_transaction(
        &self,
        user_id: &str,
        data: TransactionData,
    ) -> Result<Transaction, LedgerError> {
        self.bounded(async {
            if data.is_transfer() {
                return self.create_transfer(user_id, data).await;
            }

            let data = ValidTransactionData::validate(data)?;
            let source = self.referenced_accounts(user_id, &data).await?;

            if data.requires_funds() && source.balance < -data.amount() {
                return Err(LedgerError::InsufficientBalance {
                    account_id: source.id,
                });
            }

            let transaction = self
                .prepare_transaction(user_id, data, &source, None, Utc::now())
                .await?;
            let transaction = self.transaction_repo.insert_transaction(&transaction).await?;
            info!(
                user_id,
                transaction_id = %transaction.id,
                transaction_type = %transaction.transaction_type,
                "Posted transaction."
            );

            Ok(transaction)
        })
        .await
    }

    /// Move money from one account into another.
    ///
    /// The source account is debited by the amount plus fees and the
    /// destination credited by the same sum.
    pub async fn post_transfer(
        &self,
        user_id: &str,
        data: TransactionData,
    ) -> Result<Transaction, LedgerError> {
        self.bounded(self.create_transfer(user_id, data)).await
    }

    async fn create_transfer(
        &self,
        user_id: &str,
        data: TransactionData,
    ) -> Result<Transaction, LedgerError> {
        if !data.transaction_type.allows_destination() {
            return Err(LedgerError::InvalidTransactionType(data.transaction_type));
        }

        if data.related_account_id.is_none() {
            return Err(LedgerError::MissingDestinationAccount);
        }

        let data = ValidTransactionData::validate(data)?;
        let source = self.referenced_accounts(user_id, &data).await?;

        let transaction = self
            .prepare_transaction(user_id, data, &source, None, Utc::now())
            .await?;
        let transaction = self.transaction_repo.insert_transaction(&transaction).await?;
        info!(
            user_id,
            transaction_id = %transaction.id,
            from = %transaction.account_id,
            to = ?transaction.related_account_id,
            "Posted transfer."
        );

        Ok(transaction)
    }

    /// Replace the contents of an existing transaction.
    ///
    /// The old transaction's balance effects are reversed on every account
    /// they touched before the new ones are applied. If the currency is
    /// unchanged the original exchange rate is kept.
    pub async fn update_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        data: TransactionData,
    ) -> Result<Transaction, LedgerError> {
        self.bounded(async {
            let existing = self.owned_transaction(user_id, transaction_id).await?;

            let data = ValidTransactionData::validate(data)?;
            let source = self.referenced_accounts(user_id, &data).await?;

            if data.requires_funds() {
                let available = existing
                    .balance_effects()?
                    .iter()
                    .filter(|effect| effect.account_id == source.id)
                    .try_fold(source.balance, |balance, effect| {
                        balance.checked_sub(effect.delta)
                    })
                    .ok_or(LedgerError::InvalidAmount(data.amount()))?;

                if available < -data.amount() {
                    return Err(LedgerError::InsufficientBalance {
                        account_id: source.id,
                    });
                }
            }

            let transaction = self
                .prepare_transaction(user_id, data, &source, Some(&existing), existing.date)
                .await?;
            let transaction = self
                .transaction_repo
                .replace_transaction(user_id, transaction_id, &transaction)
                .await?;
            info!(user_id, %transaction_id, "Updated transaction.");

            Ok(transaction)
        })
        .await
    }

    /// Delete a transaction, reversing its effect on every account it
    /// touched.
    ///
    /// # Returns
    ///
    /// The deleted transaction.
    pub async fn delete_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, LedgerError> {
        self.bounded(async {
            let transaction = self
                .transaction_repo
                .delete_transaction(user_id, transaction_id)
                .await?;
            info!(user_id, %transaction_id, "Deleted transaction.");

            Ok(transaction)
        })
        .await
    }

    /// Resolve the category, currency and exchange rate of a validated
    /// transaction.
    ///
    /// When `existing` is given and uses the same currency, its exchange rate
    /// is applied to the new amount instead of looking up a fresh one.
    async fn prepare_transaction(
        &self,
        user_id: &str,
        data: ValidTransactionData,
        source: &Account,
        existing: Option<&Transaction>,
        default_date: DateTime<Utc>,
    ) -> Result<NewTransaction, LedgerError> {
        let category = self.categories.resolve(user_id, data.category_id()).await?;

        let currency = match data.currency() {
            Some(raw) => currency::normalize_code(raw)
                .ok_or_else(|| LedgerError::InvalidCurrency(raw.to_owned()))?,
            None => source.currency.clone(),
        };

        let conversion = match existing {
            Some(existing) if existing.currency == currency => {
                Conversion::at_rate(existing.exchange_rate, data.amount())
                    .ok_or(LedgerError::InvalidAmount(data.amount()))?
            }
            _ => self.exchange_rates.convert(&currency, data.amount()).await,
        };

        Ok(NewTransaction::new(
            user_id,
            data,
            &category,
            currency,
            conversion,
            default_date,
        ))
    }

    pub async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, LedgerError> {
        self.bounded(self.owned_transaction(user_id, transaction_id))
            .await
    }

    /// List an owner's transactions, newest first.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.bounded(async {
            Ok(self
                .transaction_repo
                .list_transactions(user_id, &filter)
                .await?)
        })
        .await
    }

    /// List the transactions in the period containing `reference`, using the
    /// configured period start day.
    pub async fn transactions_for_period(
        &self,
        user_id: &str,
        reference: DateTime<Utc>,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let period = period_boundaries(&reference, self.config.period_start_day)?;

        self.list_transactions(
            user_id,
            TransactionFilter {
                period: Some(period),
                ..filter
            },
        )
        .await
    }

    /// List the transactions in the current salary month.
    pub async fn transactions_for_salary_month(
        &self,
        user_id: &str,
        salary_month: SalaryMonth,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let period = salary_month.range(&Utc::now())?;

        self.list_transactions(
            user_id,
            TransactionFilter {
                period: Some(period),
                ..filter
            },
        )
        .await
    }

    /// Summarize income and spending in the current salary month.
    pub async fn summarize(
        &self,
        user_id: &str,
        salary_month: SalaryMonth,
    ) -> Result<BudgetSummary, LedgerError> {
        self.summarize_at(user_id, salary_month, Utc::now()).await
    }

    /// Summarize income and spending in the salary month containing `now`.
    pub async fn summarize_at(
        &self,
        user_id: &str,
        salary_month: SalaryMonth,
        now: DateTime<Utc>,
    ) -> Result<BudgetSummary, LedgerError> {
        let period = salary_month.range(&now)?;

        self.bounded(async {
            let filter = TransactionFilter {
                period: Some(period),
                ..TransactionFilter::default()
            };
            let transactions = self
                .transaction_repo
                .list_transactions(user_id, &filter)
                .await?;
            let net_worth = self.account_repo.net_worth(user_id).await?;

            Ok(BudgetSummary::from_transactions(
                period,
                &transactions,
                net_worth,
            ))
        })
        .await
    }

    pub async fn create_account(
        &self,
        user_id: &str,
        data: NewAccountData,
    ) -> Result<Account, LedgerError> {
        let account = NewAccount::from_data(user_id, data)?;

        self.bounded(async {
            let account = self.account_repo.create_account(&account).await?;
            info!(user_id, account_id = %account.id, "Created account.");

            Ok(account)
        })
        .await
    }

    pub async fn get_account(&self, user_id: &str, account_id: Uuid) -> Result<Account, LedgerError> {
        self.bounded(self.owned_account(user_id, account_id)).await
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>, LedgerError> {
        self.bounded(async { Ok(self.account_repo.list_accounts(user_id).await?) })
            .await
    }

    /// Change an account's name, type or currency. Balances can only be
    /// changed through transactions.
    pub async fn update_account(
        &self,
        user_id: &str,
        account_id: Uuid,
        changes: AccountChanges,
    ) -> Result<Account, LedgerError> {
        let changes = changes.normalized()?;

        self.bounded(async {
            Ok(self
                .account_repo
                .update_account(user_id, account_id, &changes)
                .await?)
        })
        .await
    }

    /// Delete an account. Accounts referenced by any transaction cannot be
    /// deleted.
    pub async fn delete_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Account, LedgerError> {
        self.bounded(async {
            let account = self.account_repo.delete_account(user_id, account_id).await?;
            info!(user_id, %account_id, "Deleted account.");

            Ok(account)
        })
        .await
    }

    /// Sum the balances of all of an owner's accounts.
    pub async fn net_worth(&self, user_id: &str) -> Result<Decimal, LedgerError> {
        self.bounded(async { Ok(self.account_repo.net_worth(user_id).await?) })
            .await
    }

    pub async fn create_category(
        &self,
        user_id: &str,
        data: CategoryData,
    ) -> Result<Category, LedgerError> {
        let data = data.normalized().ok_or(LedgerError::EmptyName)?;

        self.bounded(async { Ok(self.category_repo.create_category(user_id, &data).await?) })
            .await
    }

    pub async fn get_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, LedgerError> {
        self.bounded(async {
            self.category_repo
                .get_category(user_id, category_id)
                .await?
                .ok_or(LedgerError::NotFound(Entity::Category(category_id)))
        })
        .await
    }

    pub async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>, LedgerError> {
        self.bounded(async { Ok(self.category_repo.list_categories(user_id).await?) })
            .await
    }

    /// Rename or move a category. Transactions posted earlier keep the names
    /// they copied from it.
    pub async fn update_category(
        &self,
        user_id: &str,
        category_id: Uuid,
        data: CategoryData,
    ) -> Result<Category, LedgerError> {
        let data = data.normalized().ok_or(LedgerError::EmptyName)?;

        self.bounded(async {
            Ok(self
                .category_repo
                .update_category(user_id, category_id, &data)
                .await?)
        })
        .await
    }

    /// Delete a category. Transactions referencing it keep their copied names
    /// but lose the reference.
    pub async fn delete_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, LedgerError> {
        self.bounded(async {
            let category = self
                .category_repo
                .delete_category(user_id, category_id)
                .await?;
            info!(user_id, %category_id, "Deleted category.");

            Ok(category)
        })
        .await
    }

    /// Give an owner the default set of categories. Categories the owner
    /// already has a name for are left alone.
    ///
    /// # Returns
    ///
    /// The number of categories added.
    pub async fn seed_default_categories(&self, user_id: &str) -> Result<u64, LedgerError> {
        let defaults = categories::default_categories().collect::<Vec<_>>();

        self.bounded(async {
            Ok(self
                .category_repo
                .seed_categories(user_id, &defaults)
                .await?)
        })
        .await
    }

    /// Remove all of an owner's transactions, categories and accounts.
    pub async fn reset_owner(&self, user_id: &str) -> Result<(), LedgerError> {
        self.bounded(async {
            self.transaction_repo.reset_owner(user_id).await?;
            warn!(user_id, "Reset ledger.");

            Ok(())
        })
        .await
    }
}
