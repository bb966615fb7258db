mod accounts;
mod categories;
mod transactions;

#[cfg(test)]
pub(crate) mod memory;

pub use accounts::{AccountPersistenceError, AccountRepo, DynAccountRepo};
pub use categories::{CategoryPersistenceError, CategoryRepo, DynCategoryRepo};
pub use transactions::{DynTransactionRepo, PostingError, TransactionRepo};

/// Postgres error code raised when a unique constraint is violated.
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres error code raised when a row is still referenced by a foreign key.
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn has_error_code(error: &sqlx::Error, code: &str) -> bool {
    match error {
        sqlx::Error::Database(db_err) => db_err.code().unwrap_or_default() == code,
        _ => false,
    }
}
