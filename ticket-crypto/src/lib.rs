pub mod blind;
pub mod hsm;
pub mod key;
pub mod signer;

pub use hsm::{HsmError, SigningCapability, SoftwareHsm};
pub use key::{KeyError, KeyMaterial, PublicKey};
pub use signer::{BlindSigner, RateLimitConfig, SignerError};
