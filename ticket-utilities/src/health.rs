//! Liveness endpoint, following the `metrics`/broker-api health pattern: a
//! trivial warp filter bound on its own host:port, spawned weakly into the
//! task scope so it never blocks shutdown of the rest of the process.

use std::{net::IpAddr, sync::Arc};

use serde::Deserialize;
use tracing::info;
use warp::Filter;

use crate::task_scope::Scope;

#[derive(Debug, Clone, Deserialize, clap::Parser)]
pub struct HealthCheckOptions {
	#[clap(long = "health_check.hostname", default_value = "127.0.0.1")]
	#[serde(default = "default_hostname")]
	pub hostname: String,
	#[clap(long = "health_check.port")]
	pub port: Option<u16>,
}

fn default_hostname() -> String {
	"127.0.0.1".to_string()
}

/// Starts a `GET /health` listener if `options.port` is configured. The
/// handler reports `200 OK` only once `ready` has been set, so a load
/// balancer does not route traffic to a binary still loading its Ledger.
pub async fn start_if_configured(
	scope: &Scope<anyhow::Error>,
	options: &HealthCheckOptions,
	ready: Arc<std::sync::atomic::AtomicBool>,
) -> anyhow::Result<()> {
	let Some(port) = options.port else {
		return Ok(());
	};

	let hostname = options.hostname.clone();
	let addr: IpAddr = hostname.parse()?;

	let route = warp::path("health").and(warp::path::end()).map(move || {
		if ready.load(std::sync::atomic::Ordering::Relaxed) {
			warp::reply::with_status("OK", warp::http::StatusCode::OK)
		} else {
			warp::reply::with_status("starting", warp::http::StatusCode::SERVICE_UNAVAILABLE)
		}
	});

	let (bound_addr, future) = warp::serve(route).bind_ephemeral((addr, port));
	info!("Health check listening on {bound_addr}");

	scope.spawn_weak(async move {
		future.await;
		Ok(())
	});

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::task_scope::task_scope;
	use std::sync::atomic::AtomicBool;

	#[tokio::test]
	async fn reports_not_ready_until_flagged() {
		task_scope(|scope| async move {
			let ready = Arc::new(AtomicBool::new(false));
			let options = HealthCheckOptions { hostname: "127.0.0.1".into(), port: Some(0) };
			start_if_configured(scope, &options, ready.clone()).await.unwrap();

			// port 0 binds to an ephemeral port; we only assert the wiring does not error.
			ready.store(true, std::sync::atomic::Ordering::Relaxed);
			assert!(ready.load(std::sync::atomic::Ordering::Relaxed));
			Ok::<(), anyhow::Error>(())
		})
		.await
		.unwrap();
	}
}
