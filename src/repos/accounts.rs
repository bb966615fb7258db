use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::{has_error_code, FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION};
use crate::{
    database::PostgresConnection,
    ledger::domain::accounts::{Account, AccountChanges, NewAccount},
    models,
};

#[derive(Debug, Error)]
pub enum AccountPersistenceError {
    #[error("an account named {0:?} already exists")]
    DuplicateName(String),

    #[error("account {0} not found")]
    NotFound(Uuid),

    #[error("account {0} is referenced by transactions")]
    InUse(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DynAccountRepo = Arc<dyn AccountRepo + Send + Sync>;

#[async_trait]
pub trait AccountRepo {
    /// Persist a new account with its opening balance.
    async fn create_account(&self, account: &NewAccount)
        -> Result<Account, AccountPersistenceError>;

    /// Fetch one of an owner's accounts.
    ///
    /// # Returns
    ///
    /// [`None`] if the account does not exist or belongs to someone else.
    async fn get_account(&self, user_id: &str, account_id: Uuid)
        -> anyhow::Result<Option<Account>>;

    /// List an owner's accounts ordered by name.
    async fn list_accounts(&self, user_id: &str) -> anyhow::Result<Vec<Account>>;

    /// Change the descriptive fields of an account. The balance is never
    /// touched.
    async fn update_account(
        &self,
        user_id: &str,
        account_id: Uuid,
        changes: &AccountChanges,
    ) -> Result<Account, AccountPersistenceError>;

    /// Remove an account that no transaction references.
    async fn delete_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Account, AccountPersistenceError>;

    /// Sum the balances of all the owner's accounts.
    async fn net_worth(&self, user_id: &str) -> anyhow::Result<Decimal>;
}

#[async_trait]
impl AccountRepo for PostgresConnection {
    async fn create_account(
        &self,
        account: &NewAccount,
    ) -> Result<Account, AccountPersistenceError> {
        let result = sqlx::query_as::<_, models::ledger::Account>(
            r#"
            INSERT INTO account (id, user_id, name, account_type, currency, balance)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.user_id())
        .bind(account.name())
        .bind(account.account_type().as_str())
        .bind(account.currency())
        .bind(account.opening_balance())
        .fetch_one(&**self)
        .await;

        match result {
            Ok(model) => Ok(model.try_into()?),
            Err(error) if has_error_code(&error, UNIQUE_VIOLATION) => Err(
                AccountPersistenceError::DuplicateName(account.name().to_owned()),
            ),
            Err(error) => Err(anyhow::Error::from(error).into()),
        }
    }

    async fn get_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> anyhow::Result<Option<Account>> {
        let model = sqlx::query_as::<_, models::ledger::Account>(
            "SELECT * FROM account WHERE id = $1 AND user_id = $2",
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?;

        model.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self, user_id: &str) -> anyhow::Result<Vec<Account>> {
        sqlx::query_as::<_, models::ledger::Account>(
            "SELECT * FROM account WHERE user_id = $1 ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&**self)
        .await?
        .into_iter()
        .map(Account::try_from)
        .collect()
    }

    async fn update_account(
        &self,
        user_id: &str,
        account_id: Uuid,
        changes: &AccountChanges,
    ) -> Result<Account, AccountPersistenceError> {
        let result = sqlx::query_as::<_, models::ledger::Account>(
            r#"
            UPDATE account
            SET name = COALESCE($3, name),
                account_type = COALESCE($4, account_type),
                currency = COALESCE($5, currency)
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .bind(changes.name.as_deref())
        .bind(changes.account_type.map(|t| t.as_str()))
        .bind(changes.currency.as_deref())
        .fetch_optional(&**self)
        .await;

        match result {
            Ok(Some(model)) => Ok(model.try_into()?),
            Ok(None) => Err(AccountPersistenceError::NotFound(account_id)),
            Err(error) if has_error_code(&error, UNIQUE_VIOLATION) => {
                Err(AccountPersistenceError::DuplicateName(
                    changes.name.clone().unwrap_or_default(),
                ))
            }
            Err(error) => Err(anyhow::Error::from(error).into()),
        }
    }

    async fn delete_account(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Account, AccountPersistenceError> {
        let result = sqlx::query_as::<_, models::ledger::Account>(
            "DELETE FROM account WHERE id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await;

        match result {
            Ok(Some(model)) => Ok(model.try_into()?),
            Ok(None) => Err(AccountPersistenceError::NotFound(account_id)),
            Err(error) if has_error_code(&error, FOREIGN_KEY_VIOLATION) => {
                Err(AccountPersistenceError::InUse(account_id))
            }
            Err(error) => Err(anyhow::Error::from(error).into()),
        }
    }

    async fn net_worth(&self, user_id: &str) -> anyhow::Result<Decimal> {
        let (net_worth,): (Decimal,) =
            sqlx::query_as("SELECT COALESCE(SUM(balance), 0) FROM account WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&**self)
                .await?;

        Ok(net_worth)
    }
}
