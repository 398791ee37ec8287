// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)
//
// A drain channel: `new()` returns a `(Signal, Watch)` pair. Any component
// that wants a chance to clean up before the process exits clones the
// `Watch`, awaits `watch.signaled()`, then does its cleanup and drops the
// clone. `Signal::drain()` fires the signal and waits for every outstanding
// clone to be dropped, with a hard deadline (spec.md §5/§6: "Stop ... waits
// for its WaitGroup before transitioning out of `stopping`").

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};

struct Shared {
	outstanding: AtomicUsize,
	all_dropped: Notify,
}

pub fn new() -> (Signal, Watch) {
	let (tx, rx) = watch::channel(false);
	let shared = Arc::new(Shared {
		outstanding: AtomicUsize::new(1),
		all_dropped: Notify::new(),
	});
	(
		Signal {
			tx,
			shared: shared.clone(),
		},
		Watch { rx, shared },
	)
}

#[derive(Clone)]
pub struct Watch {
	rx: watch::Receiver<bool>,
	shared: Arc<Shared>,
}

impl Watch {
	/// Completes once `Signal::drain` has been called.
	pub async fn signaled(mut self) -> ReleaseOnDrop {
		let _ = self.rx.changed().await;
		ReleaseOnDrop { shared: self.shared }
	}
}

/// Held by a draining component until its cleanup is done; dropping it
/// tells the `Signal` one more watcher finished.
pub struct ReleaseOnDrop {
	shared: Arc<Shared>,
}

impl Drop for ReleaseOnDrop {
	fn drop(&mut self) {
		if self.shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.shared.all_dropped.notify_waiters();
		}
	}
}

pub struct Signal {
	tx: watch::Sender<bool>,
	shared: Arc<Shared>,
}

impl Signal {
	/// Registers one more watcher that must release before `drain` can
	/// complete. Call before handing out the corresponding `Watch` clone.
	pub fn reserve(&self) {
		self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
	}

	/// Fires the drain signal and waits (up to `deadline`) for every
	/// reserved watcher to release. Returns `true` if everyone drained
	/// cleanly, `false` if the deadline was hit first.
	pub async fn drain(self, deadline: Duration) -> bool {
		let _ = self.tx.send(true);
		// release our own initial reservation
		if self.shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
			return true;
		}
		let wait = self.shared.all_dropped.notified();
		tokio::select! {
			_ = wait => true,
			_ = tokio::time::sleep(deadline) => {
				tracing::warn!("drain deadline exceeded, forcing shutdown");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn drain_completes_once_watchers_release() {
		let (signal, watch) = new();
		signal.reserve();
		let w = watch.clone();
		let handle = tokio::spawn(async move {
			let _guard = w.signaled().await;
		});
		let ok = signal.drain(Duration::from_secs(1)).await;
		assert!(ok);
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn drain_hits_deadline_if_watcher_never_releases() {
		let (signal, watch) = new();
		signal.reserve();
		let _guard_forever = watch.clone();
		let held = tokio::spawn(async move {
			let _g = _guard_forever.signaled().await;
			std::future::pending::<()>().await;
		});
		let ok = signal.drain(Duration::from_millis(50)).await;
		assert!(!ok);
		held.abort();
	}
}
