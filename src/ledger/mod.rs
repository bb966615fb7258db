pub mod categories;
pub mod domain;
pub mod services;
