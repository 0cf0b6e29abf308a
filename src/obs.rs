//! Optional observability helpers for request and refresh flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `bearer_client.flow` with `flow`, `stage`
//!   and `outcome` fields, plus debug/warn events at retry and refresh decision points.
//! - Enable `metrics` to increment the `bearer_client_flow_total` counter for every
//!   attempt/success/failure (labeled by `flow` + `outcome`) and `bearer_client_retry_total` for
//!   every scheduled retry (labeled by `kind`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// An authenticated request executed through the client.
	Request,
	/// A refresh-token exchange run by the coordinator.
	Refresh,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Request => "request",
			FlowKind::Refresh => "refresh",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

macro_rules! debug_event {
	($($arg:tt)*) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::debug!($($arg)*);
		}
	}};
}
macro_rules! warn_event {
	($($arg:tt)*) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::warn!($($arg)*);
		}
	}};
}
pub(crate) use {debug_event, warn_event};
