//! Structured-concurrency helper used by every long-running binary in this
//! workspace. A [`Scope`] guarantees that when the scope's root future
//! returns (successfully or with an error), every task spawned into it has
//! either completed or been cancelled — nothing is left running in the
//! background unsupervised.
//!
//! Two kinds of spawn are distinguished:
//! - [`Scope::spawn`] — a task whose failure is fatal to the whole scope.
//!   The first such task to return `Err` cancels every sibling task and the
//!   error propagates out of [`task_scope`].
//! - [`Scope::spawn_weak`] — a task the scope does not wait on to finish
//!   (e.g. a server loop that runs until shutdown); its failure is still
//!   fatal, but its *success* does not end the scope.
//!
//! Spawned futures must be `'static`: capture owned data (typically an
//! `Arc<...>` clone) rather than borrowing from the root future's stack.

use std::future::Future;

use tokio::sync::mpsc;

/// A handle for spawning tasks supervised by an enclosing [`task_scope`] call.
pub struct Scope<E> {
	sender: mpsc::UnboundedSender<E>,
	handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<E: Send + 'static> Scope<E> {
	/// Spawn a task whose error (or panic) tears down the whole scope.
	pub fn spawn(&self, fut: impl Future<Output = Result<(), E>> + Send + 'static) {
		self.spawn_inner(fut)
	}

	/// Spawn a task that is allowed to keep running after the scope's root
	/// future returns; only a failure is reported back to the scope.
	pub fn spawn_weak(&self, fut: impl Future<Output = Result<(), E>> + Send + 'static) {
		self.spawn_inner(fut)
	}

	fn spawn_inner(&self, fut: impl Future<Output = Result<(), E>> + Send + 'static) {
		let sender = self.sender.clone();
		let handle = tokio::spawn(async move {
			if let Err(e) = fut.await {
				let _ = sender.send(e);
			}
		});
		self.handles.lock().unwrap().push(handle);
	}
}

/// Runs `root`, giving it a [`Scope`] to spawn supervised tasks into. Returns
/// the first error produced either by `root` itself or by any spawned task,
/// and aborts every still-running task before returning.
pub async fn task_scope<E, F>(root: impl FnOnce(&Scope<E>) -> F) -> Result<(), E>
where
	E: Send + 'static,
	F: Future<Output = Result<(), E>>,
{
	let (sender, mut receiver) = mpsc::unbounded_channel();
	let scope = Scope { sender, handles: std::sync::Mutex::new(Vec::new()) };

	let result = tokio::select! {
		result = root(&scope) => result,
		Some(e) = receiver.recv() => Err(e),
	};

	for handle in scope.handles.lock().unwrap().drain(..) {
		handle.abort();
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	#[tokio::test]
	async fn root_future_result_propagates() {
		let result: Result<(), &'static str> = task_scope(|_scope| async { Err("boom") }).await;
		assert_eq!(result, Err("boom"));
	}

	#[tokio::test]
	async fn spawned_task_failure_tears_down_scope() {
		let result: Result<(), &'static str> = task_scope(|scope| async move {
			scope.spawn(async { Err("task failed") });
			// root future waits "forever" unless the spawned task's error wins the race
			futures::future::pending::<()>().await;
			Ok(())
		})
		.await;
		assert_eq!(result, Err("task failed"));
	}

	#[tokio::test]
	async fn weak_task_does_not_block_scope_completion() {
		let counter = Arc::new(AtomicUsize::new(0));
		let counter_clone = counter.clone();
		let result: Result<(), anyhow::Error> = task_scope(|scope| async move {
			scope.spawn_weak(async move {
				// A weak task that would run "forever" in production (e.g. a server loop).
				futures::future::pending::<()>().await;
				#[allow(unreachable_code)]
				Ok(())
			});
			counter_clone.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
		.await;
		assert!(result.is_ok());
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}
}
