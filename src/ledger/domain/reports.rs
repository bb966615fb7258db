use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{
    categories::MainCategory,
    period::Period,
    transactions::{Transaction, TransactionType},
};

/// Share of income allocated to needs, wants and savings, in percent.
const NEEDS_SHARE: u32 = 50;
const WANTS_SHARE: u32 = 30;
const SAVINGS_SHARE: u32 = 20;

/// Planned and actual spending for one of the main budget categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BudgetLine {
    /// Spending in the base currency, as a positive magnitude.
    pub actual: Decimal,
    /// The allocation for this category.
    pub budget: Decimal,
    /// `actual` as a percentage of `budget`. Zero when there is no budget.
    pub percentage: Decimal,
}

impl BudgetLine {
    fn new(actual: Decimal, income: Decimal, share: u32) -> Self {
        let hundred = Decimal::ONE_HUNDRED;

        if income <= Decimal::ZERO {
            return Self {
                actual,
                budget: Decimal::ZERO,
                percentage: Decimal::ZERO,
            };
        }

        let budget = income * Decimal::from(share) / hundred;

        Self {
            actual,
            budget,
            percentage: (actual / budget * hundred).round_dp(2),
        }
    }
}

/// Income and spending for a single period, split along the 50/30/20 rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BudgetSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub income: Decimal,
    /// Total spending as a positive magnitude.
    pub expenses: Decimal,
    /// Income minus expenses.
    pub net: Decimal,
    pub needs: BudgetLine,
    pub wants: BudgetLine,
    pub savings: BudgetLine,
    /// Sum of the owner's account balances when the summary was built.
    pub net_worth: Decimal,
}

impl BudgetSummary {
    /// Summarize the transactions posted within a period.
    ///
    /// Only income and expense transactions count toward the totals, using
    /// their amounts in the base currency. Transactions outside the period
    /// are ignored.
    ///
    /// # Arguments
    /// * `period` - The period to summarize.
    /// * `transactions` - Candidate transactions.
    /// * `net_worth` - The owner's current net worth.
    pub fn from_transactions(
        period: Period,
        transactions: &[Transaction],
        net_worth: Decimal,
    ) -> Self {
        let mut income = Decimal::ZERO;
        let mut needs = Decimal::ZERO;
        let mut wants = Decimal::ZERO;
        let mut savings = Decimal::ZERO;
        let mut other_expenses = Decimal::ZERO;

        for transaction in transactions
            .iter()
            .filter(|transaction| period.contains(transaction.date))
        {
            let amount = transaction.amount_in_base_currency.abs();

            match transaction.transaction_type {
                TransactionType::Income => income += amount,
                TransactionType::Expense => match transaction.main_category {
                    MainCategory::Needs => needs += amount,
                    MainCategory::Wants => wants += amount,
                    MainCategory::Savings => savings += amount,
                    MainCategory::Transfer | MainCategory::Income => other_expenses += amount,
                },
                TransactionType::Savings | TransactionType::Transfer => {}
            }
        }

        let expenses = needs + wants + savings + other_expenses;

        Self {
            start: period.start(),
            end: period.end(),
            income,
            expenses,
            net: income - expenses,
            needs: BudgetLine::new(needs, income, NEEDS_SHARE),
            wants: BudgetLine::new(wants, income, WANTS_SHARE),
            savings: BudgetLine::new(savings, income, SAVINGS_SHARE),
            net_worth,
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    fn march() -> Period {
        Period::new(
            Utc.with_ymd_and_hms(2024, 2, 25, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 24, 23, 59, 59).unwrap(),
        )
    }

    fn transaction(
        transaction_type: TransactionType,
        main_category: MainCategory,
        amount_in_base_currency: Decimal,
        day: u32,
    ) -> Transaction {
        let date = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();

        Transaction {
            id: Uuid::new_v4(),
            user_id: "owner".to_owned(),
            description: String::new(),
            amount: amount_in_base_currency,
            currency: "SEK".to_owned(),
            amount_in_base_currency,
            exchange_rate: Decimal::ONE,
            date,
            main_category,
            subcategory: main_category.to_string(),
            category_id: None,
            account_id: Uuid::new_v4(),
            related_account_id: None,
            transaction_type,
            fees: Decimal::ZERO,
            created_at: date,
        }
    }

    #[test]
    fn needs_over_budget() {
        let transactions = vec![
            transaction(TransactionType::Income, MainCategory::Income, dec!(1000), 1),
            transaction(TransactionType::Expense, MainCategory::Needs, dec!(-600), 2),
        ];

        let summary = BudgetSummary::from_transactions(march(), &transactions, dec!(400));

        assert_eq!(dec!(1000), summary.income);
        assert_eq!(dec!(600), summary.expenses);
        assert_eq!(dec!(400), summary.net);
        assert_eq!(dec!(500), summary.needs.budget);
        assert_eq!(dec!(120), summary.needs.percentage);
        assert_eq!(dec!(300), summary.wants.budget);
        assert_eq!(Decimal::ZERO, summary.wants.percentage);
        assert_eq!(dec!(200), summary.savings.budget);
        assert_eq!(dec!(400), summary.net_worth);
    }

    #[test]
    fn percentages_are_zero_without_income() {
        let transactions = vec![transaction(
            TransactionType::Expense,
            MainCategory::Wants,
            dec!(-50),
            3,
        )];

        let summary = BudgetSummary::from_transactions(march(), &transactions, Decimal::ZERO);

        assert_eq!(dec!(50), summary.wants.actual);
        assert_eq!(Decimal::ZERO, summary.wants.budget);
        assert_eq!(Decimal::ZERO, summary.wants.percentage);
        assert_eq!(dec!(-50), summary.net);
    }

    #[test]
    fn transfers_and_savings_moves_are_ignored() {
        let transactions = vec![
            transaction(TransactionType::Income, MainCategory::Income, dec!(2000), 1),
            transaction(TransactionType::Transfer, MainCategory::Transfer, dec!(500), 4),
            transaction(TransactionType::Savings, MainCategory::Savings, dec!(-300), 5),
            transaction(TransactionType::Expense, MainCategory::Savings, dec!(-100), 6),
        ];

        let summary = BudgetSummary::from_transactions(march(), &transactions, Decimal::ZERO);

        assert_eq!(dec!(100), summary.expenses);
        assert_eq!(dec!(100), summary.savings.actual);
        assert_eq!(dec!(25), summary.savings.percentage);
    }

    #[test]
    fn transactions_outside_period_are_ignored() {
        let transactions = vec![
            transaction(TransactionType::Income, MainCategory::Income, dec!(1000), 1),
            transaction(TransactionType::Income, MainCategory::Income, dec!(1000), 25),
        ];

        let summary = BudgetSummary::from_transactions(march(), &transactions, Decimal::ZERO);

        assert_eq!(dec!(1000), summary.income);
    }
}
