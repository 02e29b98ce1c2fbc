pub mod bloom;
pub mod publisher;

pub use bloom::{derive_parameters, BloomFilter, DEFAULT_TARGET_FPR};
pub use publisher::{FilterPublisher, FilterPublisherConfig};
