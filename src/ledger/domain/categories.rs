use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// The top level budget bucket a category belongs to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MainCategory {
    Needs,
    Wants,
    Savings,
    Transfer,
    Income,
}

impl MainCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Needs => "Needs",
            Self::Wants => "Wants",
            Self::Savings => "Savings",
            Self::Transfer => "Transfer",
            Self::Income => "Income",
        }
    }
}

impl fmt::Display for MainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MainCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Needs" => Ok(Self::Needs),
            "Wants" => Ok(Self::Wants),
            "Savings" => Ok(Self::Savings),
            "Transfer" => Ok(Self::Transfer),
            "Income" => Ok(Self::Income),
            other => Err(UnknownVariant::new("main category", other)),
        }
    }
}

/// A user defined subcategory beneath one of the main categories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub main_category: MainCategory,
    pub created_at: DateTime<Utc>,
}

/// Data for a new category, or the replacement values for an existing one.
#[derive(Clone, Debug, Deserialize)]
pub struct CategoryData {
    pub name: String,
    pub main_category: MainCategory,
}

impl CategoryData {
    /// Trim the name, returning [`None`] if nothing is left of it.
    pub fn normalized(self) -> Option<Self> {
        let name = self.name.trim();

        if name.is_empty() {
            None
        } else {
            Some(Self {
                name: name.to_owned(),
                main_category: self.main_category,
            })
        }
    }
}

/// Categories every owner starts out with.
pub const DEFAULT_CATEGORIES: [(&str, MainCategory); 29] = [
    ("Emergency Fund", MainCategory::Savings),
    ("Investments", MainCategory::Savings),
    ("Debt Repayment", MainCategory::Savings),
    ("Short Term", MainCategory::Savings),
    ("Travels", MainCategory::Savings),
    ("Savings", MainCategory::Savings),
    ("Interests Earned", MainCategory::Savings),
    ("Pets", MainCategory::Needs),
    ("House Services", MainCategory::Needs),
    ("Bank Fees", MainCategory::Needs),
    ("Groceries", MainCategory::Needs),
    ("Rent", MainCategory::Needs),
    ("Utilities", MainCategory::Needs),
    ("Transportation", MainCategory::Needs),
    ("Work Lunches", MainCategory::Needs),
    ("Family Support", MainCategory::Needs),
    ("Streaming Services", MainCategory::Wants),
    ("Health", MainCategory::Wants),
    ("Leisure", MainCategory::Wants),
    ("Self Care", MainCategory::Wants),
    ("Entertainment", MainCategory::Wants),
    ("Shopping", MainCategory::Wants),
    ("Hobbies", MainCategory::Wants),
    ("Taxi", MainCategory::Wants),
    ("Restaurants", MainCategory::Wants),
    ("Transfer", MainCategory::Transfer),
    ("Salary", MainCategory::Income),
    ("Interests", MainCategory::Income),
    ("Payments", MainCategory::Income),
];

pub fn default_categories() -> impl Iterator<Item = CategoryData> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(name, main_category)| CategoryData {
            name: (*name).to_owned(),
            main_category: *main_category,
        })
}
