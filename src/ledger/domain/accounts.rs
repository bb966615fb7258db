use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{currency, UnknownVariant};

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AccountType {
    Bank,
    Cash,
    Credit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "Bank",
            Self::Cash => "Cash",
            Self::Credit => "Credit",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bank" => Ok(Self::Bank),
            "Cash" => Ok(Self::Cash),
            "Credit" => Ok(Self::Credit),
            other => Err(UnknownVariant::new("account type", other)),
        }
    }
}

/// An account holding money in a single currency.
///
/// The balance is only ever changed by posting, updating or deleting
/// transactions that reference the account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Data for a new account provided by a user.
#[derive(Clone, Debug, Deserialize)]
pub struct NewAccountData {
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    #[serde(default)]
    pub opening_balance: Decimal,
}

/// Changes to an existing account. Fields left empty keep their current value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountChanges {
    pub name: Option<String>,
    pub account_type: Option<AccountType>,
    pub currency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountInvalidity {
    EmptyName,
    InvalidCurrency(String),
}

/// A new account that passed validation and is ready to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewAccount {
    user_id: String,
    name: String,
    account_type: AccountType,
    currency: String,
    opening_balance: Decimal,
}

impl NewAccount {
    /// Validate account data for the given owner.
    ///
    /// The name is trimmed and the currency code upper-cased.
    pub fn from_data<S: Into<String>>(
        user_id: S,
        data: NewAccountData,
    ) -> Result<Self, AccountInvalidity> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(AccountInvalidity::EmptyName);
        }

        let currency = currency::normalize_code(&data.currency)
            .ok_or(AccountInvalidity::InvalidCurrency(data.currency.clone()))?;

        Ok(Self {
            user_id: user_id.into(),
            name: name.to_owned(),
            account_type: data.account_type,
            currency,
            opening_balance: data.opening_balance,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn opening_balance(&self) -> Decimal {
        self.opening_balance
    }
}

impl AccountChanges {
    /// Validate the changes, trimming the name and upper-casing the currency.
    pub fn normalized(self) -> Result<Self, AccountInvalidity> {
        let name = match self.name {
            Some(name) if name.trim().is_empty() => return Err(AccountInvalidity::EmptyName),
            Some(name) => Some(name.trim().to_owned()),
            None => None,
        };

        let currency = match self.currency {
            Some(raw) => Some(
                currency::normalize_code(&raw).ok_or(AccountInvalidity::InvalidCurrency(raw))?,
            ),
            None => None,
        };

        Ok(Self {
            name,
            account_type: self.account_type,
            currency,
        })
    }
}
