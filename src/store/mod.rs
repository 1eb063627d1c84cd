pub mod memory;
pub mod models;
pub mod repository;

pub use memory::InMemoryCreditStore;
pub use repository::{CreditStore, PgCreditStore};
