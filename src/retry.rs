//! Retry/backoff decision engine.
//!
//! [`RetryPolicy`] is pure: it never sleeps or performs IO. The executor feeds it an
//! [`AttemptRecord`] plus the latest [`AttemptOutcome`] and acts on the returned
//! [`RetryDecision`]. Authentication failures (401) never reach the policy; they are resolved by
//! the refresh coordinator and do not consume a retry.

// self
use crate::{_prelude::*, error::ConfigError};

/// Backoff strategy applied between retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
	/// Constant delay of `retryInterval` between attempts.
	#[default]
	Linear,
	/// Delay of `base^attempt * scale`, where `attempt` counts retries already performed.
	Exponential,
}
impl RetryKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RetryKind::Linear => "linear",
			RetryKind::Exponential => "exponential",
		}
	}
}

/// Declarative retry configuration as supplied by callers.
///
/// Every omitted key falls back to a documented default:
///
/// | Key | Default |
/// | --- | --- |
/// | `type` | `linear` |
/// | `retryLimit` | `2` |
/// | `retryMethods` | `GET`, `PUT`, `DELETE`, `HEAD`, `OPTIONS` |
/// | `statusCodes` | `500`, `502`, `503`, `504` |
/// | `retryInterval` | `2000` ms |
/// | `exponentialBackoffBase` | `2` |
/// | `exponentialBackoffScale` | `500` ms |
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicyConfig {
	/// Backoff strategy.
	#[serde(rename = "type")]
	pub kind: RetryKind,
	/// Maximum number of retries. Zero disables retrying.
	pub retry_limit: u32,
	/// Method names eligible for retry.
	#[serde(alias = "retryableMethods")]
	pub retry_methods: BTreeSet<String>,
	/// Status codes eligible for retry.
	#[serde(alias = "retryableStatusCodes")]
	pub status_codes: BTreeSet<u16>,
	/// Linear delay in milliseconds.
	pub retry_interval: u64,
	/// Exponential base.
	#[serde(alias = "backoffBase")]
	pub exponential_backoff_base: f64,
	/// Exponential scale in milliseconds.
	#[serde(alias = "backoffScale")]
	pub exponential_backoff_scale: u64,
}
impl RetryPolicyConfig {
	/// Default retry limit.
	pub const DEFAULT_RETRY_LIMIT: u32 = 2;
	/// Default linear interval in milliseconds.
	pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 2_000;
	/// Default exponential base.
	pub const DEFAULT_BACKOFF_BASE: f64 = 2.;
	/// Default exponential scale in milliseconds.
	pub const DEFAULT_BACKOFF_SCALE_MS: u64 = 500;
	/// Idempotent methods retried by default.
	pub const DEFAULT_METHODS: [&'static str; 5] = ["GET", "PUT", "DELETE", "HEAD", "OPTIONS"];
	/// Server-error statuses retried by default.
	pub const DEFAULT_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

	/// Linear configuration with the given limit and interval.
	pub fn linear(retry_limit: u32, interval: StdDuration) -> Self {
		Self {
			kind: RetryKind::Linear,
			retry_limit,
			retry_interval: duration_millis(interval),
			..Default::default()
		}
	}

	/// Exponential configuration with the given limit, base, and scale.
	pub fn exponential(retry_limit: u32, base: f64, scale: StdDuration) -> Self {
		Self {
			kind: RetryKind::Exponential,
			retry_limit,
			exponential_backoff_base: base,
			exponential_backoff_scale: duration_millis(scale),
			..Default::default()
		}
	}

	/// Replaces the retryable method set.
	pub fn with_methods<I, S>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.retry_methods = methods.into_iter().map(Into::into).collect();

		self
	}

	/// Replaces the retryable status set.
	pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
		self.status_codes = codes.into_iter().collect();

		self
	}
}
impl Default for RetryPolicyConfig {
	fn default() -> Self {
		Self {
			kind: RetryKind::Linear,
			retry_limit: Self::DEFAULT_RETRY_LIMIT,
			retry_methods: Self::DEFAULT_METHODS.into_iter().map(String::from).collect(),
			status_codes: Self::DEFAULT_STATUS_CODES.into_iter().collect(),
			retry_interval: Self::DEFAULT_RETRY_INTERVAL_MS,
			exponential_backoff_base: Self::DEFAULT_BACKOFF_BASE,
			exponential_backoff_scale: Self::DEFAULT_BACKOFF_SCALE_MS,
		}
	}
}

/// Per-request attempt bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct AttemptRecord {
	/// Number of retries already performed (0 before the first retry).
	pub attempt_number: u32,
	/// Status code of the most recent attempt, if it produced one.
	pub last_status: Option<u16>,
	/// Rendered transport error of the most recent attempt, if any.
	pub last_error: Option<String>,
}
impl AttemptRecord {
	/// Records the outcome of the attempt that just finished.
	pub fn observe(&mut self, outcome: &AttemptOutcome) {
		self.last_status = outcome.status;
		self.last_error = outcome.transport_error.clone();
	}

	/// Counts one scheduled retry.
	pub fn advance(&mut self) {
		self.attempt_number += 1;
	}
}

/// What the latest attempt produced, as needed by the policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
	/// HTTP status code, absent when the transport failed.
	pub status: Option<u16>,
	/// Rendered transport error, if the transport failed.
	pub transport_error: Option<String>,
}
impl AttemptOutcome {
	/// Outcome of an attempt that produced an HTTP status.
	pub fn status(status: u16) -> Self {
		Self { status: Some(status), transport_error: None }
	}

	/// Outcome of an attempt that failed below HTTP.
	pub fn transport(error: impl Display) -> Self {
		Self { status: None, transport_error: Some(error.to_string()) }
	}
}

/// Result of [`RetryPolicy::should_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
	/// Whether the request should be resubmitted.
	pub retry: bool,
	/// Delay before resubmitting; zero when `retry` is false.
	pub delay: StdDuration,
	/// `true` when the retry limit, rather than eligibility, stopped the request.
	pub limit_reached: bool,
}
impl RetryDecision {
	const fn stop(limit_reached: bool) -> Self {
		Self { retry: false, delay: StdDuration::ZERO, limit_reached }
	}
}

/// Validated retry policy.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
	kind: RetryKind,
	retry_limit: u32,
	methods: BTreeSet<String>,
	status_codes: BTreeSet<u16>,
	interval: StdDuration,
	base: f64,
	scale: StdDuration,
}
impl RetryPolicy {
	/// Validates `config` and builds a policy.
	pub fn from_config(config: &RetryPolicyConfig) -> Result<Self, ConfigError> {
		if !config.exponential_backoff_base.is_finite() || config.exponential_backoff_base < 1. {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "exponential backoff base must be a finite number of at least 1",
			});
		}

		let methods = config
			.retry_methods
			.iter()
			.map(|name| {
				Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
					.map(|method| method.as_str().to_owned())
					.map_err(|_| ConfigError::InvalidRetryPolicy {
						reason: "retry methods must be HTTP methods",
					})
			})
			.collect::<Result<_, _>>()?;

		Ok(Self::from_parts(config, methods))
	}

	fn from_parts(config: &RetryPolicyConfig, methods: BTreeSet<String>) -> Self {
		Self {
			kind: config.kind,
			retry_limit: config.retry_limit,
			methods,
			status_codes: config.status_codes.clone(),
			interval: StdDuration::from_millis(config.retry_interval),
			base: config.exponential_backoff_base,
			scale: StdDuration::from_millis(config.exponential_backoff_scale),
		}
	}

	/// Narrows the retryable methods to exactly `method`.
	///
	/// Applied to per-request policies so a request is never retried as a different method.
	pub fn scoped_to(mut self, method: &Method) -> Self {
		self.methods = BTreeSet::from([method.as_str().to_owned()]);

		self
	}

	/// Backoff strategy.
	pub fn kind(&self) -> RetryKind {
		self.kind
	}

	/// Maximum number of retries.
	pub fn retry_limit(&self) -> u32 {
		self.retry_limit
	}

	/// Upper-case names of the methods eligible for retry.
	pub fn methods(&self) -> &BTreeSet<String> {
		&self.methods
	}

	/// Decides whether the request that produced `outcome` should be resubmitted.
	pub fn should_retry(
		&self,
		attempt: &AttemptRecord,
		outcome: &AttemptOutcome,
		method: &Method,
	) -> RetryDecision {
		if !self.methods.contains(method.as_str()) {
			return RetryDecision::stop(false);
		}

		let eligible = match outcome.status {
			None => true,
			Some(status) => self.status_codes.contains(&status),
		};

		if !eligible {
			return RetryDecision::stop(false);
		}
		if attempt.attempt_number >= self.retry_limit {
			return RetryDecision::stop(true);
		}

		RetryDecision { retry: true, delay: self.delay_for(attempt.attempt_number), limit_reached: false }
	}

	/// Delay before the retry that follows `attempt_number` completed retries.
	pub fn delay_for(&self, attempt_number: u32) -> StdDuration {
		match self.kind {
			RetryKind::Linear => self.interval,
			RetryKind::Exponential => {
				let factor = self.base.powi(attempt_number.min(i32::MAX as u32) as i32);

				StdDuration::try_from_secs_f64(self.scale.as_secs_f64() * factor)
					.unwrap_or(StdDuration::MAX)
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		let config = RetryPolicyConfig::default();
		let methods = config.retry_methods.clone();

		Self::from_parts(&config, methods)
	}
}

pub(crate) fn duration_millis(duration: StdDuration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
