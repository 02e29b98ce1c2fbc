pub mod error;
pub mod redeemer;

pub use error::RedeemError;
pub use redeemer::{RedeemDecision, RedeemRequest, Redeemer, RedeemerConfig};
