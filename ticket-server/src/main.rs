//! The ticketing backend binary: wires the Ledger, every component crate,
//! and the HTTP surface together, following `chainflip-broker-api`'s
//! `task_scope`-driven `main` (§7B).

mod error;
mod routes;
mod settings;
mod state;

use std::net::IpAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use futures::FutureExt;
use ticket_crypto::SoftwareHsm;
use ticket_issuer::InMemoryPaymentAdapter;
use ticket_ledger::Ledger;
use ticket_primitives::{now_unix, IssuerKeyRecord, KeyId, KeyStatus};
use utilities::{health, task_scope::task_scope};

use crate::settings::{Settings, ServerOptions};
use crate::state::AppState;

/// Signing key bit length for the Ledger's first key when no key has ever
/// been registered. Operators who need a different size or a key rollover
/// schedule register subsequent keys out of band (§4.2 is silent on how the
/// very first key gets there).
const INITIAL_KEY_BITS: usize = 3072;

fn ensure_initial_key(ledger: &Ledger, hsm: &SoftwareHsm) -> anyhow::Result<()> {
	if !ledger.list_key_records()?.is_empty() {
		return Ok(());
	}

	let key_id = KeyId(1);
	let public = hsm.generate_key(key_id, INITIAL_KEY_BITS)?;

	let now = now_unix();
	ledger.put_key_record(&IssuerKeyRecord {
		key_id,
		public_key_pem: public.to_pem()?,
		activates_at: now,
		expires_at: now + 365 * 24 * 3600,
		status: KeyStatus::Active,
	})?;
	tracing::warn!(%key_id, "generated a fresh signing key; no key was registered in the ledger");
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let opts = ServerOptions::parse();
	tracing_subscriber::FmtSubscriber::builder()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.try_init()
		.expect("setting default subscriber failed");

	let settings = Settings::load(opts.config_file.as_deref())?;

	task_scope(|scope| {
		async move {
			let has_completed_initialising = Arc::new(AtomicBool::new(false));
			health::start_if_configured(scope, &opts.health_check, has_completed_initialising.clone()).await?;

			let ledger = Arc::new(Ledger::open(&opts.ledger_path)?);
			let hsm = SoftwareHsm::new();
			ensure_initial_key(&ledger, &hsm)?;
			let payment = Arc::new(InMemoryPaymentAdapter::new());

			let state =
				Arc::new(AppState::new(ledger.clone(), hsm, payment, &settings, opts.admin_token.clone()));

			let filter_publisher_state = state.clone();
			let publish_interval = settings.bloom.publish_interval_secs;
			scope.spawn(async move {
				let mut ticker = tokio::time::interval(std::time::Duration::from_secs(publish_interval));
				loop {
					ticker.tick().await;
					if let Err(error) = filter_publisher_state.filter_publisher.publish_snapshot() {
						tracing::error!(?error, "failed to publish bloom snapshot");
					}
				}
			});

			let sweep_ledger = ledger.clone();
			let sweep_interval = settings.reconciler.sweep_interval_secs;
			let day_pass_window_secs = settings.redeemer.day_pass_window_secs;
			scope.spawn(async move {
				let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
				loop {
					ticker.tick().await;
					let cutoff = now_unix() - 2 * day_pass_window_secs;
					match sweep_ledger.prune_observations_before(cutoff) {
						Ok(pruned) if pruned > 0 => tracing::debug!(pruned, "reconciler sweep pruned stale observations"),
						Ok(_) => {},
						Err(error) => tracing::error!(%error, "reconciler sweep failed"),
					}
				}
			});

			let routes = routes::all(state);
			let addr: IpAddr = opts.bind_hostname.parse()?;
			let (bound_addr, serve) = warp::serve(routes).bind_ephemeral((addr, opts.bind_port));
			tracing::info!("ticket-server listening on {bound_addr}");

			has_completed_initialising.store(true, std::sync::atomic::Ordering::Relaxed);

			scope.spawn_weak(async move {
				serve.await;
				Ok(())
			});

			futures::future::pending::<()>().await;
			Ok(())
		}
		.boxed()
	})
	.await
}
