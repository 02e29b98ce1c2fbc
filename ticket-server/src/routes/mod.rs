//! Assembles every endpoint in §6's interface table behind one
//! `.recover(handle_rejection)`, following the `vault::api` composition
//! pattern: each submodule owns its own filter tree, `mod.rs` only `.or()`s
//! them together.

pub mod admin;
pub mod bloom;
pub mod issuance;
pub mod keys;
pub mod redeem;
pub mod sync;

use std::sync::Arc;

use warp::Filter;

use crate::error::handle_rejection;
use crate::state::AppState;

pub fn all(state: Arc<AppState>) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
	keys::routes(state.clone())
		.or(issuance::routes(state.clone()))
		.or(redeem::routes(state.clone()))
		.or(bloom::routes(state.clone()))
		.or(sync::routes(state.clone()))
		.or(admin::routes(state))
		.recover(handle_rejection)
}
