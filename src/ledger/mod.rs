pub mod confirmation;
pub mod ethereum;
pub mod gateway;

#[cfg(test)]
pub mod mock;

pub use confirmation::{ConfirmationConfig, ConfirmationWaiter};
pub use ethereum::{EthereumConfig, EthereumGateway};
pub use gateway::{
    normalize_address, validate_address, LedgerCredit, LedgerGateway, LedgerOperation, TxHandle,
};
