//! Single-flight credential refresh.
//!
//! [`RefreshCoordinator`] guarantees at most one in-flight refresh exchange per client. A
//! request that receives a 401 calls [`RefreshCoordinator::refresh`] with the credential it sent.
//! Under one async mutex the coordinator either joins the exchange already in flight, answers
//! with the already-current stored credential when the failed one is stale, or starts a new
//! exchange. The exchange runs on its own task, so cancelling the request that started it never
//! aborts a refresh other requests are waiting on. The outcome is committed to the store and
//! published to every waiter through a `watch` channel.

mod exchange;
mod metrics;

pub use exchange::*;
pub use metrics::RefreshMetrics;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::TransientError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CredentialStore,
};

/// Collaborator hook invoked around each refresh exchange.
///
/// Platforms that suspend backgrounded processes can use it to request extra execution time.
pub trait ExtendedWork
where
	Self: Send + Sync,
{
	/// Called before the exchange starts. Returning `false` skips the exchange, which is then
	/// reported as a transient failure.
	fn begin(&self) -> bool {
		true
	}

	/// Called after the exchange finished, whatever its result.
	fn end(&self) {}
}

/// [`ExtendedWork`] hook that grants every request and does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExtendedWork;
impl ExtendedWork for NoExtendedWork {}

/// Result of a refresh, shared by every request that waited on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A credential newer than the failed one is available; retry once with it.
	Refreshed(Credential),
	/// The refresh token is permanently invalid or no credential exists; the session is over.
	Rejected {
		/// Server- or client-supplied reason.
		reason: String,
	},
	/// The exchange failed transiently. The stored credential was left untouched.
	Unavailable {
		/// Credential that remains current.
		credential: Credential,
		/// Rendered failure.
		reason: String,
	},
}

/// Observable coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPhase {
	/// No exchange is running.
	Idle,
	/// An exchange is running and new callers join it.
	Refreshing,
}

enum Phase {
	Idle,
	Refreshing(watch::Receiver<Option<RefreshOutcome>>),
}

struct Inner {
	phase: AsyncMutex<Phase>,
	epoch: AtomicU64,
	store: Arc<dyn CredentialStore>,
	exchange: Arc<dyn RefreshExchange>,
	hook: Arc<dyn ExtendedWork>,
	metrics: RefreshMetrics,
}
impl Inner {
	async fn run_exchange(&self, current: &Credential) -> Result<Credential> {
		if !self.hook.begin() {
			return Err(TransientError::ExtendedWorkDenied.into());
		}

		self.metrics.record_exchange();

		let exchange = self.exchange.clone();
		let credential = current.clone();
		// A nested task turns an exchange panic into a join error instead of a stuck flight.
		let joined = tokio::spawn(async move { exchange.refresh(&credential).await }).await;

		self.hook.end();

		joined.unwrap_or_else(|_| Err(TransientError::RefreshInterrupted.into()))
	}

	async fn commit(
		&self,
		epoch: u64,
		current: Credential,
		result: Result<Credential>,
		tx: watch::Sender<Option<RefreshOutcome>>,
	) {
		let mut phase = self.phase.lock().await;

		if self.epoch.load(Ordering::SeqCst) != epoch {
			obs::debug_event!("refresh finished after a reset; discarding the result");

			tx.send_replace(Some(RefreshOutcome::Unavailable {
				credential: current,
				reason: "The session was reset while the refresh was in flight.".into(),
			}));

			return;
		}

		let outcome = match result {
			Ok(fresh) => {
				if let Err(e) = self.store.save(fresh.clone()).await {
					obs::warn_event!(error = %e, "refreshed credential could not be persisted");
				}

				self.metrics.record_success();

				RefreshOutcome::Refreshed(fresh)
			},
			Err(Error::InvalidGrant { reason }) => {
				if let Err(e) = self.store.clear().await {
					obs::warn_event!(error = %e, "rejected credential could not be cleared");
				}

				self.metrics.record_rejection();
				obs::warn_event!(%reason, "refresh token rejected; credential cleared");

				RefreshOutcome::Rejected { reason }
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::warn_event!(error = %e, "refresh failed transiently; keeping credential");

				RefreshOutcome::Unavailable { credential: current, reason: e.to_string() }
			},
		};

		*phase = Phase::Idle;

		tx.send_replace(Some(outcome));
	}
}

/// Serializes credential refreshes for one client instance.
///
/// Clones share the same exclusion domain.
#[derive(Clone)]
pub struct RefreshCoordinator(Arc<Inner>);
impl RefreshCoordinator {
	/// Creates a coordinator over `store` and `exchange`, calling `hook` around each exchange.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		exchange: Arc<dyn RefreshExchange>,
		hook: Arc<dyn ExtendedWork>,
	) -> Self {
		Self(Arc::new(Inner {
			phase: AsyncMutex::new(Phase::Idle),
			epoch: AtomicU64::new(0),
			store,
			exchange,
			hook,
			metrics: RefreshMetrics::default(),
		}))
	}

	/// Counters describing coordinator activity.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.0.metrics
	}

	/// Current phase.
	pub async fn phase(&self) -> RefreshPhase {
		match &*self.0.phase.lock().await {
			Phase::Refreshing(rx) if rx.has_changed().is_ok() => RefreshPhase::Refreshing,
			_ => RefreshPhase::Idle,
		}
	}

	/// Resolves a 401 that was produced with `failed`.
	///
	/// Errors only when the store cannot be read; every exchange result is an outcome.
	pub async fn refresh(&self, failed: &Credential) -> Result<RefreshOutcome> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.refresh_inner(failed)).await;

		let outcome = match &result {
			Ok(RefreshOutcome::Refreshed(_)) => FlowOutcome::Success,
			_ => FlowOutcome::Failure,
		};

		span.record_outcome(outcome);
		obs::record_flow_outcome(KIND, outcome);

		result
	}

	/// Returns to [`RefreshPhase::Idle`]. A flight still running will not commit its result.
	pub async fn reset(&self) {
		let mut phase = self.0.phase.lock().await;

		self.0.epoch.fetch_add(1, Ordering::SeqCst);

		*phase = Phase::Idle;
	}

	async fn refresh_inner(&self, failed: &Credential) -> Result<RefreshOutcome> {
		let mut rx = {
			let mut phase = self.0.phase.lock().await;

			match &*phase {
				// A closed channel means the flight died without publishing; start over.
				Phase::Refreshing(rx) if rx.has_changed().is_ok() => {
					self.0.metrics.record_join();
					obs::debug_event!("joining in-flight refresh");

					rx.clone()
				},
				_ => {
					let Some(current) = self.0.store.load().await? else {
						*phase = Phase::Idle;

						return Ok(RefreshOutcome::Rejected {
							reason: "No credential is stored.".into(),
						});
					};

					if current.supersedes(failed) {
						*phase = Phase::Idle;

						self.0.metrics.record_short_circuit();
						obs::debug_event!("401 used a stale credential; reusing the current one");

						return Ok(RefreshOutcome::Refreshed(current));
					}

					let (tx, rx) = watch::channel(None);

					*phase = Phase::Refreshing(rx.clone());

					self.start_flight(current, tx);
					obs::debug_event!("refresh started");

					rx
				},
			}
		};
		let outcome = rx.wait_for(Option::is_some).await.ok().and_then(|value| value.clone());

		Ok(outcome.unwrap_or_else(|| RefreshOutcome::Unavailable {
			credential: failed.clone(),
			reason: TransientError::RefreshInterrupted.to_string(),
		}))
	}

	fn start_flight(&self, current: Credential, tx: watch::Sender<Option<RefreshOutcome>>) {
		let inner = self.0.clone();
		let epoch = inner.epoch.load(Ordering::SeqCst);

		tokio::spawn(async move {
			let result = inner.run_exchange(&current).await;

			inner.commit(epoch, current, result, tx).await;
		});
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator").field("metrics", &self.0.metrics).finish_non_exhaustive()
	}
}
