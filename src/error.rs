//! Client-level error types shared across the executor, refresh coordinator, and stores.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// `Client::execute` only returns an error for conditions that cannot be represented as an
/// exchange result (malformed input, storage and configuration failures, cancellation). Network
/// outcomes, including exhausted retries and authentication failures, are reported through the
/// returned result instead.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Caller supplied input that cannot be turned into a request.
	#[error(transparent)]
	MalformedInput(#[from] MalformedInputError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Token endpoint confirmed the refresh token is no longer valid.
	#[error("Token endpoint rejected the refresh token: {reason}.")]
	InvalidGrant {
		/// Server- or client-supplied reason string.
		reason: String,
	},
	/// The request was cancelled before it completed.
	#[error("Request was cancelled.")]
	Cancelled,
}
impl Error {
	/// Returns `true` for failures that a later attempt may resolve.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_) | Self::Storage(_))
	}
}

/// Input validation failures raised before any network activity.
#[derive(Debug, ThisError)]
pub enum MalformedInputError {
	/// The endpoint could not be composed into an absolute HTTP(S) URL.
	#[error("Malformed URL: {input}.")]
	Url {
		/// Endpoint string supplied by the caller.
		input: String,
		/// Underlying parsing failure, when the URL parser produced one.
		#[source]
		source: Option<url::ParseError>,
	},
	/// The HTTP method name is not a valid token.
	#[error("Invalid HTTP method `{method}`.")]
	Method {
		/// Method string supplied by the caller.
		method: String,
	},
	/// A header name or value is not valid HTTP.
	#[error("Invalid header `{name}`.")]
	Header {
		/// Offending header name.
		name: String,
	},
	/// A JSON body could not be serialized.
	#[error("Request body could not be encoded.")]
	Body(#[source] serde_json::Error),
}
impl MalformedInputError {
	pub(crate) fn url(input: impl Into<String>, source: Option<url::ParseError>) -> Self {
		Self::Url { input: input.into(), source }
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base or token endpoint URL is invalid.
	#[error("Endpoint URL `{url}` is invalid.")]
	InvalidEndpoint {
		/// Offending URL string.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Client-wide default header cannot be encoded.
	#[error("Default header `{name}` is invalid.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
	/// Retry policy parameters are out of range.
	#[error("Retry policy is invalid: {reason}.")]
	InvalidRetryPolicy {
		/// Human-readable validation failure.
		reason: &'static str,
	},
	/// Bootstrap `apiToken` payload could not be parsed.
	#[error("Session apiToken payload is not a valid credential.")]
	InvalidApiToken(#[source] serde_json::Error),
	/// Credential builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// No transport was supplied and the `reqwest` feature is disabled.
	#[error("No HTTP transport was configured.")]
	MissingTransport,
	/// A credential was bootstrapped but no refresh exchange is configured.
	#[error("A credential is configured but no refresh exchange is available.")]
	MissingAuthConfiguration,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Server- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The lifecycle hook refused to grant time for a refresh exchange.
	#[error("Extended work was denied; the refresh exchange was not attempted.")]
	ExtendedWorkDenied,
	/// The refresh flight ended without publishing an outcome.
	#[error("Refresh exchange was interrupted.")]
	RefreshInterrupted,
}

/// Transport-level failures (network, IO, timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error: {source}")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// No response arrived within the configured timeout.
	#[error("Request timed out after {}ms.", .after.as_millis())]
	Timeout {
		/// Timeout that elapsed.
		after: StdDuration,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Returns `true` if the failure was a timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
