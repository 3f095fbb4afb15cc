pub mod models;
pub mod repository;
pub mod store;

#[cfg(test)]
pub mod memory;

pub use repository::LedgerRepository;
pub use store::{LedgerStore, SettlementTx};
