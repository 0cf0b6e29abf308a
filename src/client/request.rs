//! Request description and its preparation into a transport-ready form.

// crates.io
use oauth2::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*, client::options::RequestOptions, error::MalformedInputError,
	retry::RetryPolicyConfig,
};

/// Request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
	/// JSON document, sent with `Content-Type: application/json` unless overridden.
	Json(serde_json::Value),
	/// UTF-8 text.
	Text(String),
	/// Raw bytes.
	Bytes(Vec<u8>),
	/// Explicit empty body, sent with `Content-Length: 0`.
	Empty,
}
impl From<serde_json::Value> for RequestBody {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Self::Empty,
			serde_json::Value::String(text) => Self::Text(text),
			other => Self::Json(other),
		}
	}
}

/// One request as described by the caller.
#[derive(Clone, Debug)]
pub struct RequestSpec {
	/// HTTP method.
	pub method: Method,
	/// Endpoint, relative to the client base URL or absolute.
	pub endpoint: String,
	/// Per-request headers; they override client defaults on collision.
	pub headers: Vec<(String, String)>,
	/// Payload. `None` sends no body, except for POST/PUT/PATCH which send an explicit empty body.
	pub body: Option<RequestBody>,
	/// Per-attempt timeout; falls back to the session default.
	pub timeout: Option<StdDuration>,
	/// Per-request retry policy, scoped to `method` when applied.
	pub retry_policy: Option<RetryPolicyConfig>,
	/// Cancels this request alone when triggered.
	pub cancellation: Option<CancellationToken>,
}
impl RequestSpec {
	/// Starts a spec for `method` on `endpoint`.
	pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
		Self {
			method,
			endpoint: endpoint.into(),
			headers: Vec::new(),
			body: None,
			timeout: None,
			retry_policy: None,
			cancellation: None,
		}
	}

	/// Shorthand for a GET.
	pub fn get(endpoint: impl Into<String>) -> Self {
		Self::new(Method::GET, endpoint)
	}

	/// Shorthand for a POST.
	pub fn post(endpoint: impl Into<String>) -> Self {
		Self::new(Method::POST, endpoint)
	}

	/// Builds a spec from command-surface options.
	pub fn from_options(method: Method, endpoint: impl Into<String>, options: RequestOptions) -> Self {
		Self {
			headers: options.headers.into_iter().collect(),
			body: options.body.map(RequestBody::from),
			timeout: options.timeout_interval.map(StdDuration::from_millis),
			retry_policy: options.retry_policy_configuration,
			..Self::new(method, endpoint)
		}
	}

	/// Adds a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sets the body.
	pub fn body(mut self, body: RequestBody) -> Self {
		self.body = Some(body);

		self
	}

	/// Sets a JSON body.
	pub fn json(self, value: serde_json::Value) -> Self {
		self.body(RequestBody::Json(value))
	}

	/// Sets the per-attempt timeout.
	pub fn timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Sets the per-request retry policy.
	pub fn retry_policy(mut self, config: RetryPolicyConfig) -> Self {
		self.retry_policy = Some(config);

		self
	}

	/// Cancels the request when `token` is cancelled.
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancellation = Some(token);

		self
	}
}

/// Validated, transport-ready request. Credentials are attached per attempt.
#[derive(Clone, Debug)]
pub(crate) struct PreparedRequest {
	pub(crate) method: Method,
	pub(crate) url: Url,
	pub(crate) headers: HeaderMap,
	pub(crate) body: Option<Vec<u8>>,
}
impl PreparedRequest {
	pub(crate) fn prepare(
		spec: &RequestSpec,
		base_url: Option<&Url>,
		default_headers: &HeaderMap,
	) -> Result<Self, MalformedInputError> {
		let url = resolve_url(base_url, &spec.endpoint)?;
		let mut headers = default_headers.clone();

		for (name, value) in &spec.headers {
			let header = || MalformedInputError::Header { name: name.clone() };
			let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| header())?;
			let value = HeaderValue::from_str(value).map_err(|_| header())?;

			headers.insert(name, value);
		}

		let body = match &spec.body {
			Some(RequestBody::Empty) => Some(Vec::new()),
			Some(RequestBody::Json(serde_json::Value::Null)) => Some(Vec::new()),
			Some(RequestBody::Json(value)) => {
				set_default_content_type(&mut headers, "application/json");

				Some(serde_json::to_vec(value).map_err(MalformedInputError::Body)?)
			},
			Some(RequestBody::Text(text)) => {
				set_default_content_type(&mut headers, "text/plain; charset=utf-8");

				Some(text.as_bytes().to_vec())
			},
			Some(RequestBody::Bytes(bytes)) => {
				set_default_content_type(&mut headers, "application/octet-stream");

				Some(bytes.clone())
			},
			None if matches!(spec.method, Method::POST | Method::PUT | Method::PATCH) =>
				Some(Vec::new()),
			None => None,
		};

		if body.as_ref().is_some_and(Vec::is_empty) {
			headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
		}

		Ok(Self { method: spec.method.clone(), url, headers, body })
	}
}

/// Composes `endpoint` with `base_url`.
///
/// Absolute `http`/`https` endpoints are used as-is. Relative paths, including ones that only
/// look like an opaque URL such as `users:search`, are appended to the base URL's path. Other
/// hierarchical schemes are rejected, as is anything relative without a base URL.
pub(crate) fn resolve_url(base_url: Option<&Url>, endpoint: &str) -> Result<Url, MalformedInputError> {
	let endpoint = endpoint.trim();

	if endpoint.is_empty() {
		return Err(MalformedInputError::url(endpoint, None));
	}

	match (Url::parse(endpoint), base_url) {
		(Ok(absolute), _) if is_http(&absolute) => Ok(absolute),
		(Ok(opaque), Some(base)) if opaque.cannot_be_a_base() => join_to_base(base, endpoint),
		(Ok(_), _) => Err(MalformedInputError::url(endpoint, None)),
		(Err(e), None) => Err(MalformedInputError::url(endpoint, Some(e))),
		(Err(_), Some(base)) => join_to_base(base, endpoint),
	}
}

fn join_to_base(base: &Url, endpoint: &str) -> Result<Url, MalformedInputError> {
	let joined =
		format!("{}/{}", base.as_str().trim_end_matches('/'), endpoint.trim_start_matches('/'));

	Url::parse(&joined).ok().filter(is_http).ok_or_else(|| MalformedInputError::url(endpoint, None))
}

fn is_http(url: &Url) -> bool {
	matches!(url.scheme(), "http" | "https") && url.host().is_some()
}

fn set_default_content_type(headers: &mut HeaderMap, value: &'static str) {
	headers.entry(CONTENT_TYPE).or_insert_with(|| HeaderValue::from_static(value));
}
