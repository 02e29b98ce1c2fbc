//! The Payment Adapter is explicitly out of scope (§1 Non-goals) beyond its
//! shape: `POST /verify` returning `{receiptId, status, amount, currency}`
//! (§6). [`PaymentAdapter`] is the seam a real integration plugs into;
//! [`InMemoryPaymentAdapter`] is a fake used by tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	Verified,
	Pending,
	Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
	pub receipt_id: String,
	pub status: PaymentStatus,
	pub amount: u64,
	pub currency: String,
}

#[derive(Debug, Error)]
pub enum PaymentAdapterError {
	#[error("payment adapter has no record of this receipt")]
	NotFound,
	#[error("payment adapter unavailable: {0}")]
	Unavailable(String),
}

#[async_trait::async_trait]
pub trait PaymentAdapter: Send + Sync {
	async fn verify(
		&self,
		payment_provider: &str,
		provider_receipt_id: &str,
	) -> Result<PaymentVerification, PaymentAdapterError>;
}

/// In-memory stand-in for a real payment provider integration (§9B): any
/// receipt ref not explicitly seeded verifies, so local/dev runs and tests
/// don't need to seed every receipt they ever check. [`seed`](Self::seed) is
/// for the one case that needs to differ from that default — asserting that
/// a specific ref is `pending`/`rejected`, or pinning its amount/currency.
#[derive(Default)]
pub struct InMemoryPaymentAdapter {
	receipts: Mutex<HashMap<(String, String), PaymentVerification>>,
}

impl InMemoryPaymentAdapter {
	pub fn new() -> Self {
		InMemoryPaymentAdapter::default()
	}

	pub fn seed(&self, payment_provider: &str, provider_receipt_id: &str, verification: PaymentVerification) {
		self.receipts
			.lock()
			.unwrap()
			.insert((payment_provider.to_string(), provider_receipt_id.to_string()), verification);
	}
}

#[async_trait::async_trait]
impl PaymentAdapter for InMemoryPaymentAdapter {
	async fn verify(
		&self,
		payment_provider: &str,
		provider_receipt_id: &str,
	) -> Result<PaymentVerification, PaymentAdapterError> {
		let seeded = self.receipts.lock().unwrap().get(&(payment_provider.to_string(), provider_receipt_id.to_string())).cloned();
		Ok(seeded.unwrap_or_else(|| PaymentVerification {
			receipt_id: provider_receipt_id.to_string(),
			status: PaymentStatus::Verified,
			amount: 0,
			currency: "USD".to_string(),
		}))
	}
}
