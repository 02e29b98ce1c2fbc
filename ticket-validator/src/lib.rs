pub mod error;
pub mod runtime;
pub mod store;
pub mod sync;

pub use error::{SyncError, ValidatorError};
pub use runtime::{ValidateOutcome, ValidatorRuntime, ValidatorRuntimeConfig};
pub use store::{LocalStore, LocalStoreError};
pub use sync::{FilterSource, ReconcileClient, SyncSummary};
