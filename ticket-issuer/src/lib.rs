pub mod error;
pub mod issuer;
pub mod payment;

pub use error::IssuerError;
pub use issuer::{Issuer, IssuerConfig, SignedTicket};
pub use payment::{InMemoryPaymentAdapter, PaymentAdapter, PaymentAdapterError, PaymentStatus, PaymentVerification};
