use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{
    categories::{Category, MainCategory},
    currency::Conversion,
    period::Period,
    UnknownVariant,
};

/// Amounts and fees must stay below 10^15 in magnitude to fit the storage
/// precision of balances.
const AMOUNT_DIGITS: u32 = 15;

fn max_amount() -> Decimal {
    Decimal::from(10u64.pow(AMOUNT_DIGITS))
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum TransactionType {
    Income,
    Expense,
    Savings,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "Income",
            Self::Expense => "Expense",
            Self::Savings => "Savings",
            Self::Transfer => "Transfer",
        }
    }

    /// Whether this type of transaction may move money into a second account.
    pub fn allows_destination(&self) -> bool {
        matches!(self, Self::Savings | Self::Transfer)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Income" => Ok(Self::Income),
            "Expense" => Ok(Self::Expense),
            "Savings" => Ok(Self::Savings),
            "Transfer" => Ok(Self::Transfer),
            other => Err(UnknownVariant::new("transaction type", other)),
        }
    }
}

/// Data for a new transaction, or the replacement values for an existing one,
/// as provided by a user.
///
/// The sign of `amount` is not significant for single account transactions:
/// expenses and savings always reduce the account balance and income always
/// increases it. Transfers must have a positive amount.
#[derive(Clone, Debug, Deserialize)]
pub struct TransactionData {
    pub description: String,
    pub amount: Decimal,
    /// Defaults to the source account's currency.
    pub currency: Option<String>,
    /// Defaults to the moment the transaction is posted.
    pub date: Option<DateTime<Utc>>,
    pub category_id: Uuid,
    pub account_id: Uuid,
    pub related_account_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub fees: Decimal,
}

impl TransactionData {
    /// Whether the data describes money moving between two accounts.
    pub fn is_transfer(&self) -> bool {
        self.transaction_type == TransactionType::Transfer
            || (self.transaction_type.allows_destination() && self.related_account_id.is_some())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionInvalidity {
    /// Single account transactions must have a non-zero amount, transfers a
    /// positive one. Amounts and fees must also fit the storage precision.
    InvalidAmount(Decimal),
    /// Fees may not be negative.
    NegativeFees(Decimal),
    /// A transfer is missing the account receiving the money.
    MissingDestination,
    /// A transfer names the same account as source and destination.
    SameAccount,
    /// The type cannot carry a destination account.
    UnexpectedDestination(TransactionType),
}

/// How a validated transaction moves money.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    SingleAccount,
    Transfer { destination: Uuid },
}

/// Transaction data that passed validation, with the amount converted to its
/// signed effect on the source account.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidTransactionData {
    description: String,
    amount: Decimal,
    currency: Option<String>,
    date: Option<DateTime<Utc>>,
    category_id: Uuid,
    account_id: Uuid,
    flow: Flow,
    transaction_type: TransactionType,
    fees: Decimal,
}

impl ValidTransactionData {
    /// Validate user provided data.
    ///
    /// Single account amounts are signed by type: expenses and savings become
    /// negative and income positive. Transfers keep their positive amount and
    /// carry the fees; single account transactions never carry fees.
    pub fn validate(data: TransactionData) -> Result<Self, TransactionInvalidity> {
        let flow = if data.is_transfer() {
            let destination = data
                .related_account_id
                .ok_or(TransactionInvalidity::MissingDestination)?;

            if destination == data.account_id {
                return Err(TransactionInvalidity::SameAccount);
            }

            if data.amount <= Decimal::ZERO {
                return Err(TransactionInvalidity::InvalidAmount(data.amount));
            }

            if data.fees < Decimal::ZERO {
                return Err(TransactionInvalidity::NegativeFees(data.fees));
            }

            if data
                .amount
                .checked_add(data.fees)
                .map_or(true, |moved| moved >= max_amount())
            {
                return Err(TransactionInvalidity::InvalidAmount(data.amount));
            }

            Flow::Transfer { destination }
        } else {
            if data.related_account_id.is_some() {
                return Err(TransactionInvalidity::UnexpectedDestination(
                    data.transaction_type,
                ));
            }

            if data.amount.is_zero() || data.amount.abs() >= max_amount() {
                return Err(TransactionInvalidity::InvalidAmount(data.amount));
            }

            Flow::SingleAccount
        };

        let (amount, fees) = match (flow, data.transaction_type) {
            (Flow::Transfer { .. }, _) => (data.amount, data.fees),
            (Flow::SingleAccount, TransactionType::Income) => (data.amount.abs(), Decimal::ZERO),
            (Flow::SingleAccount, _) => (-data.amount.abs(), Decimal::ZERO),
        };

        Ok(Self {
            description: data.description.trim().to_owned(),
            amount,
            currency: data.currency,
            date: data.date,
            category_id: data.category_id,
            account_id: data.account_id,
            flow,
            transaction_type: data.transaction_type,
            fees,
        })
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    pub fn category_id(&self) -> Uuid {
        self.category_id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn destination(&self) -> Option<Uuid> {
        match self.flow {
            Flow::SingleAccount => None,
            Flow::Transfer { destination } => Some(destination),
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn fees(&self) -> Decimal {
        self.fees
    }

    /// Whether the transaction spends money that must be available in the
    /// source account.
    pub fn requires_funds(&self) -> bool {
        self.transaction_type == TransactionType::Expense
    }
}

/// A change to one account's balance caused by a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceEffect {
    pub account_id: Uuid,
    pub delta: Decimal,
    /// The account must not end up with a negative balance after applying the
    /// effect.
    pub requires_funds: bool,
}

impl BalanceEffect {
    /// The effect that undoes this one. Undoing never requires funds.
    pub fn reversed(&self) -> Self {
        Self {
            account_id: self.account_id,
            delta: -self.delta,
            requires_funds: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("amount {amount} with fees {fees} is out of range")]
pub struct AmountOverflow {
    pub amount: Decimal,
    pub fees: Decimal,
}

/// Compute the balance changes a transaction applies when it is posted.
///
/// Single account transactions change the source balance by their signed
/// amount. Transfers, and savings moved into another account, debit the source
/// by `amount + fees` and credit the destination by the same sum.
pub fn balance_effects(
    transaction_type: TransactionType,
    account_id: Uuid,
    related_account_id: Option<Uuid>,
    amount: Decimal,
    fees: Decimal,
) -> Result<Vec<BalanceEffect>, AmountOverflow> {
    let effects = match related_account_id {
        Some(destination) if transaction_type.allows_destination() => {
            let moved = amount
                .checked_add(fees)
                .ok_or(AmountOverflow { amount, fees })?;

            vec![
                BalanceEffect {
                    account_id,
                    delta: -moved,
                    requires_funds: false,
                },
                BalanceEffect {
                    account_id: destination,
                    delta: moved,
                    requires_funds: false,
                },
            ]
        }
        _ => vec![BalanceEffect {
            account_id,
            delta: amount,
            requires_funds: transaction_type == TransactionType::Expense,
        }],
    };

    Ok(effects)
}

/// A transaction that has been validated and enriched with its category and
/// currency conversion, but not persisted yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTransaction {
    user_id: String,
    description: String,
    amount: Decimal,
    currency: String,
    conversion: Conversion,
    date: DateTime<Utc>,
    main_category: MainCategory,
    subcategory: String,
    category_id: Uuid,
    account_id: Uuid,
    related_account_id: Option<Uuid>,
    transaction_type: TransactionType,
    fees: Decimal,
}

impl NewTransaction {
    /// Assemble a transaction ready to be persisted.
    ///
    /// # Arguments
    /// * `user_id` - The owner of the transaction.
    /// * `data` - The validated transaction data.
    /// * `category` - The category the data references. Its main category and
    ///   name are copied onto the transaction.
    /// * `currency` - The currency of the amount.
    /// * `conversion` - The conversion of the amount into the base currency.
    /// * `now` - Used as the transaction date if the data has none.
    pub fn new<S: Into<String>>(
        user_id: S,
        data: ValidTransactionData,
        category: &Category,
        currency: String,
        conversion: Conversion,
        now: DateTime<Utc>,
    ) -> Self {
        let related_account_id = data.destination();

        Self {
            user_id: user_id.into(),
            description: data.description,
            amount: data.amount,
            currency,
            conversion,
            date: data.date.unwrap_or(now),
            main_category: category.main_category,
            subcategory: category.name.clone(),
            category_id: category.id,
            account_id: data.account_id,
            related_account_id,
            transaction_type: data.transaction_type,
            fees: data.fees,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn conversion(&self) -> Conversion {
        self.conversion
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn main_category(&self) -> MainCategory {
        self.main_category
    }

    pub fn subcategory(&self) -> &str {
        &self.subcategory
    }

    pub fn category_id(&self) -> Uuid {
        self.category_id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn related_account_id(&self) -> Option<Uuid> {
        self.related_account_id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn fees(&self) -> Decimal {
        self.fees
    }

    pub fn balance_effects(&self) -> Result<Vec<BalanceEffect>, AmountOverflow> {
        balance_effects(
            self.transaction_type,
            self.account_id,
            self.related_account_id,
            self.amount,
            self.fees,
        )
    }

    /// The persisted form of this transaction.
    pub fn into_transaction(self, id: Uuid, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            description: self.description,
            amount: self.amount,
            currency: self.currency,
            amount_in_base_currency: self.conversion.amount_in_base(),
            exchange_rate: self.conversion.rate(),
            date: self.date,
            main_category: self.main_category,
            subcategory: self.subcategory,
            category_id: Some(self.category_id),
            account_id: self.account_id,
            related_account_id: self.related_account_id,
            transaction_type: self.transaction_type,
            fees: self.fees,
            created_at,
        }
    }
}

/// A posted transaction.
///
/// `main_category` and `subcategory` are copies taken from the category when
/// the transaction was written. Renaming or deleting the category later does
/// not change them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub description: String,
    /// The signed effect on the source account for single account
    /// transactions, or the positive amount moved for transfers.
    pub amount: Decimal,
    pub currency: String,
    pub amount_in_base_currency: Decimal,
    /// Zero if no exchange rate was available.
    pub exchange_rate: Decimal,
    pub date: DateTime<Utc>,
    pub main_category: MainCategory,
    pub subcategory: String,
    pub category_id: Option<Uuid>,
    pub account_id: Uuid,
    pub related_account_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub fees: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn balance_effects(&self) -> Result<Vec<BalanceEffect>, AmountOverflow> {
        balance_effects(
            self.transaction_type,
            self.account_id,
            self.related_account_id,
            self.amount,
            self.fees,
        )
    }
}

/// Filters for listing transactions. Empty fields match everything.
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    /// Matches transactions using the account as source or destination.
    pub account_id: Option<Uuid>,
    pub main_category: Option<MainCategory>,
    pub period: Option<Period>,
    pub limit: Option<u32>,
}
