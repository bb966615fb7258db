use std::convert::TryFrom;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::domain;

/// An account as stored in the `account` table.
#[derive(Debug, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub account_type: String,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A category as stored in the `category` table.
#[derive(Debug, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub main_category: String,
    pub created_at: DateTime<Utc>,
}

/// A transaction as stored in the `transaction` table.
#[derive(Debug, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub amount_in_base_currency: Decimal,
    pub exchange_rate: Decimal,
    pub date: DateTime<Utc>,
    pub main_category: String,
    pub subcategory: String,
    pub category_id: Option<Uuid>,
    pub account_id: Uuid,
    pub related_account_id: Option<Uuid>,
    pub transaction_type: String,
    pub fees: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<Account> for domain::accounts::Account {
    type Error = anyhow::Error;

    fn try_from(model: Account) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            account_type: model
                .account_type
                .parse()
                .with_context(|| format!("invalid account row {}", model.id))?,
            currency: model.currency,
            balance: model.balance,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<Category> for domain::categories::Category {
    type Error = anyhow::Error;

    fn try_from(model: Category) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            main_category: model
                .main_category
                .parse()
                .with_context(|| format!("invalid category row {}", model.id))?,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<Transaction> for domain::transactions::Transaction {
    type Error = anyhow::Error;

    fn try_from(model: Transaction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            description: model.description,
            amount: model.amount,
            currency: model.currency,
            amount_in_base_currency: model.amount_in_base_currency,
            exchange_rate: model.exchange_rate,
            date: model.date,
            main_category: model
                .main_category
                .parse()
                .with_context(|| format!("invalid transaction row {}", model.id))?,
            subcategory: model.subcategory,
            category_id: model.category_id,
            account_id: model.account_id,
            related_account_id: model.related_account_id,
            transaction_type: model
                .transaction_type
                .parse()
                .with_context(|| format!("invalid transaction row {}", model.id))?,
            fees: model.fees,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::ledger::domain::{categories::MainCategory, transactions::TransactionType};

    fn transaction_row(transaction_type: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: "owner".to_owned(),
            description: "Rent".to_owned(),
            amount: dec!(-8000),
            currency: "SEK".to_owned(),
            amount_in_base_currency: dec!(-8000),
            exchange_rate: Decimal::ONE,
            date: Utc::now(),
            main_category: "Needs".to_owned(),
            subcategory: "Rent".to_owned(),
            category_id: None,
            account_id: Uuid::new_v4(),
            related_account_id: None,
            transaction_type: transaction_type.to_owned(),
            fees: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transaction_row_parses_enums() {
        let transaction = domain::transactions::Transaction::try_from(transaction_row("Expense"))
            .expect("row should be valid");

        assert_eq!(TransactionType::Expense, transaction.transaction_type);
        assert_eq!(MainCategory::Needs, transaction.main_category);
    }

    #[test]
    fn transaction_row_with_unknown_type_is_rejected() {
        let result = domain::transactions::Transaction::try_from(transaction_row("Gift"));

        assert!(result.is_err());
    }
}
