pub mod error;
pub mod ledger;
pub mod store;

pub use error::LedgerError;
pub use ledger::{Ledger, SpendOutcome};
