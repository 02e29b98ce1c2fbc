//! Wires the Ledger and every component crate together into the shared
//! state every route handler closes over (§2 System Overview's component
//! list, instantiated as one process).

use std::sync::Arc;

use ticket_crypto::{BlindSigner, RateLimitConfig, SoftwareHsm};
use ticket_filter::{FilterPublisher, FilterPublisherConfig};
use ticket_issuer::{Issuer, IssuerConfig, PaymentAdapter};
use ticket_ledger::Ledger;
use ticket_reconciler::{Reconciler, ReconcilerConfig};
use ticket_redeemer::{Redeemer, RedeemerConfig};

use crate::settings::Settings;

pub struct AppState {
	pub ledger: Arc<Ledger>,
	pub issuer: Issuer<SoftwareHsm, Arc<Ledger>>,
	pub redeemer: Redeemer,
	pub reconciler: Reconciler,
	pub filter_publisher: FilterPublisher,
	pub admin_token: String,
}

impl AppState {
	pub fn new(
		ledger: Arc<Ledger>,
		hsm: SoftwareHsm,
		payment: Arc<dyn PaymentAdapter>,
		settings: &Settings,
		admin_token: String,
	) -> Self {
		let signer = Arc::new(BlindSigner::new(
			hsm,
			ledger.clone(),
			RateLimitConfig { sustained_per_sec: settings.signer.rate_sustained_per_sec, burst: settings.signer.rate_burst },
		));
		let issuer = Issuer::new(
			ledger.clone(),
			signer,
			payment,
			IssuerConfig { key_min_lead_time: settings.issuer.key_min_lead_time_secs },
		);
		let redeemer = Redeemer::new(
			ledger.clone(),
			RedeemerConfig {
				day_pass_max_redemptions: settings.redeemer.day_pass_max_redemptions,
				day_pass_window_secs: settings.redeemer.day_pass_window_secs,
				clock_skew_secs: settings.redeemer.single_ticket_clock_skew_secs,
			},
		);
		let reconciler = Reconciler::new(
			ledger.clone(),
			ReconcilerConfig {
				day_pass_max_redemptions: settings.redeemer.day_pass_max_redemptions,
				day_pass_window_secs: settings.redeemer.day_pass_window_secs,
				batch_max: settings.reconciler.batch_max,
			},
		);
		let filter_publisher = FilterPublisher::new(
			ledger.clone(),
			FilterPublisherConfig {
				target_fpr: settings.bloom.target_fpr,
				coverage_window_secs: settings.bloom.coverage_window_secs,
				retained_versions: settings.bloom.retained_versions,
			},
		);

		AppState { ledger, issuer, redeemer, reconciler, filter_publisher, admin_token }
	}
}
