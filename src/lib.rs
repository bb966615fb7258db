pub mod cli;
pub mod database;
pub mod exchange_rates;
pub mod ledger;
pub mod models;
pub mod repos;
