use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    ledger::domain::{
        transactions::{
            AmountOverflow, BalanceEffect, NewTransaction, Transaction, TransactionFilter,
        },
        Entity,
    },
    models,
};

#[derive(Debug, Error)]
pub enum PostingError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("insufficient balance in account {account_id}")]
    InsufficientBalance { account_id: Uuid },

    #[error(transparent)]
    OutOfRange(#[from] AmountOverflow),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for PostingError {
    fn from(error: sqlx::Error) -> Self {
        Self::Other(error.into())
    }
}

pub type DynTransactionRepo = Arc<dyn TransactionRepo + Send + Sync>;

/// Storage for transactions and the account balances they affect.
///
/// Every write applies the transaction's balance effects in the same atomic
/// unit as the row change. If any effect cannot be applied nothing is
/// written.
#[async_trait]
pub trait TransactionRepo {
    /// Persist a new transaction and apply its balance effects.
    ///
    /// # Returns
    ///
    /// The persisted transaction, [`PostingError::NotFound`] if an account
    /// does not exist, or [`PostingError::InsufficientBalance`] if an account
    /// that requires funds would end up negative.
    async fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError>;

    /// Replace an existing transaction, reversing its old balance effects
    /// before applying the new ones.
    async fn replace_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError>;

    /// Delete a transaction and reverse its balance effects.
    ///
    /// # Returns
    ///
    /// The deleted transaction.
    async fn delete_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, PostingError>;

    async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> anyhow::Result<Option<Transaction>>;

    /// List an owner's transactions, newest first.
    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> anyhow::Result<Vec<Transaction>>;

    /// Remove every transaction, category and account belonging to an owner.
    async fn reset_owner(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Order balance effects by account so concurrent writes lock account rows in
/// the same order. The sort is stable, so effects on one account keep their
/// relative order and reversals still run before the effects replacing them.
pub(crate) fn in_lock_order(mut effects: Vec<BalanceEffect>) -> Vec<BalanceEffect> {
    effects.sort_by_key(|effect| effect.account_id);
    effects
}

/// The effects of replacing `existing` with `replacement`, in lock order.
pub(crate) fn replacement_effects(
    existing: &Transaction,
    replacement: &NewTransaction,
) -> Result<Vec<BalanceEffect>, AmountOverflow> {
    let mut effects: Vec<_> = existing
        .balance_effects()?
        .iter()
        .map(BalanceEffect::reversed)
        .collect();
    effects.extend(replacement.balance_effects()?);

    Ok(in_lock_order(effects))
}

/// Apply a single balance effect within an open database transaction.
async fn apply_effect(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: &str,
    effect: &BalanceEffect,
) -> Result<(), PostingError> {
    let rows = sqlx::query(
        r#"
        UPDATE account
        SET balance = balance + $3
        WHERE id = $1
            AND user_id = $2
            AND (NOT $4 OR balance + $3 >= 0)
        "#,
    )
    .bind(effect.account_id)
    .bind(user_id)
    .bind(effect.delta)
    .bind(effect.requires_funds)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if rows == 1 {
        debug!(account_id = %effect.account_id, delta = %effect.delta, "Applied balance effect.");
        return Ok(());
    }

    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM account WHERE id = $1 AND user_id = $2)")
            .bind(effect.account_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

    if exists {
        Err(PostingError::InsufficientBalance {
            account_id: effect.account_id,
        })
    } else {
        Err(PostingError::NotFound(Entity::Account(effect.account_id)))
    }
}

async fn lock_transaction(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: &str,
    transaction_id: Uuid,
) -> Result<Transaction, PostingError> {
    let model = sqlx::query_as::<_, models::ledger::Transaction>(
        r#"SELECT * FROM "transaction" WHERE id = $1 AND user_id = $2 FOR UPDATE"#,
    )
    .bind(transaction_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(PostingError::NotFound(Entity::Transaction(transaction_id)))?;

    Ok(model.try_into()?)
}

#[async_trait]
impl TransactionRepo for PostgresConnection {
    async fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError> {
        let mut tx = self.begin().await?;

        for effect in in_lock_order(transaction.balance_effects()?) {
            apply_effect(&mut tx, transaction.user_id(), &effect).await?;
        }

        let model = sqlx::query_as::<_, models::ledger::Transaction>(
            r#"
            INSERT INTO "transaction" (
                id, user_id, description, amount, currency,
                amount_in_base_currency, exchange_rate, "date", main_category,
                subcategory, category_id, account_id, related_account_id,
                transaction_type, fees
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(transaction.user_id())
        .bind(transaction.description())
        .bind(transaction.amount())
        .bind(transaction.currency())
        .bind(transaction.conversion().amount_in_base())
        .bind(transaction.conversion().rate())
        .bind(transaction.date())
        .bind(transaction.main_category().as_str())
        .bind(transaction.subcategory())
        .bind(transaction.category_id())
        .bind(transaction.account_id())
        .bind(transaction.related_account_id())
        .bind(transaction.transaction_type().as_str())
        .bind(transaction.fees())
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;

        let transaction = Transaction::try_from(model)?;
        info!(transaction_id = %transaction.id, "Inserted transaction.");

        Ok(transaction)
    }

    async fn replace_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
        transaction: &NewTransaction,
    ) -> Result<Transaction, PostingError> {
        let mut tx = self.begin().await?;

        let existing = lock_transaction(&mut tx, user_id, transaction_id).await?;

        for effect in replacement_effects(&existing, transaction)? {
            apply_effect(&mut tx, user_id, &effect).await?;
        }

        let model = sqlx::query_as::<_, models::ledger::Transaction>(
            r#"
            UPDATE "transaction"
            SET description = $3,
                amount = $4,
                currency = $5,
                amount_in_base_currency = $6,
                exchange_rate = $7,
                "date" = $8,
                main_category = $9,
                subcategory = $10,
                category_id = $11,
                account_id = $12,
                related_account_id = $13,
                transaction_type = $14,
                fees = $15
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(transaction.description())
        .bind(transaction.amount())
        .bind(transaction.currency())
        .bind(transaction.conversion().amount_in_base())
        .bind(transaction.conversion().rate())
        .bind(transaction.date())
        .bind(transaction.main_category().as_str())
        .bind(transaction.subcategory())
        .bind(transaction.category_id())
        .bind(transaction.account_id())
        .bind(transaction.related_account_id())
        .bind(transaction.transaction_type().as_str())
        .bind(transaction.fees())
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;
        info!(%transaction_id, "Replaced transaction.");

        Ok(Transaction::try_from(model)?)
    }

    async fn delete_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<Transaction, PostingError> {
        let mut tx = self.begin().await?;

        let existing = lock_transaction(&mut tx, user_id, transaction_id).await?;

        for effect in in_lock_order(existing.balance_effects()?) {
            apply_effect(&mut tx, user_id, &effect.reversed()).await?;
        }

        sqlx::query(r#"DELETE FROM "transaction" WHERE id = $1"#)
            .bind(transaction_id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        info!(%transaction_id, "Deleted transaction.");

        Ok(existing)
    }

    async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> anyhow::Result<Option<Transaction>> {
        let model = sqlx::query_as::<_, models::ledger::Transaction>(
            r#"SELECT * FROM "transaction" WHERE id = $1 AND user_id = $2"#,
        )
        .bind(transaction_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?;

        model.map(Transaction::try_from).transpose()
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> anyhow::Result<Vec<Transaction>> {
        let mut query_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(r#"SELECT t.* FROM "transaction" t WHERE t.user_id = "#);
        query_builder.push_bind(user_id);

        if let Some(transaction_type) = filter.transaction_type {
            query_builder
                .push(" AND t.transaction_type = ")
                .push_bind(transaction_type.as_str());
        }

        if let Some(account_id) = filter.account_id {
            query_builder
                .push(" AND (t.account_id = ")
                .push_bind(account_id)
                .push(" OR t.related_account_id = ")
                .push_bind(account_id)
                .push(")");
        }

        if let Some(main_category) = filter.main_category {
            query_builder
                .push(" AND t.main_category = ")
                .push_bind(main_category.as_str());
        }

        if let Some(period) = filter.period {
            query_builder
                .push(r#" AND t."date" BETWEEN "#)
                .push_bind(period.start())
                .push(" AND ")
                .push_bind(period.end());
        }

        query_builder.push(r#" ORDER BY t."date" DESC, t.created_at DESC"#);

        if let Some(limit) = filter.limit {
            query_builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        query_builder
            .build_query_as::<models::ledger::Transaction>()
            .fetch_all(&**self)
            .await
            .context("failed to list transactions")?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    async fn reset_owner(&self, user_id: &str) -> anyhow::Result<()> {
        let mut tx = self.begin().await?;

        let transactions = sqlx::query(r#"DELETE FROM "transaction" WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut tx)
            .await?
            .rows_affected();
        let categories = sqlx::query("DELETE FROM category WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut tx)
            .await?
            .rows_affected();
        let accounts = sqlx::query("DELETE FROM account WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        info!(user_id, transactions, categories, accounts, "Reset ledger.");

        Ok(())
    }
}
