//! Normalization of completed exchanges into [`ExchangeResult`].

// self
use crate::{_prelude::*, error::TransportError, http::TransportResponse};

/// Why an exchange ended in an authentication failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthFailure {
	/// The refresh token was rejected (`invalid_grant`); the credential was cleared.
	Permanent,
	/// The refresh exchange failed transiently; the credential was kept.
	RefreshUnavailable,
	/// The server answered 401 again after a successful refresh.
	Rejected,
}

/// Terminal classification of an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
	/// 2xx response.
	Success,
	/// No response was received.
	Transport,
	/// Non-2xx response unrelated to authentication.
	Http,
	/// A 401 could not be resolved through a refresh.
	AuthenticationExpired,
	/// The refresh token was permanently rejected; the application must log in again.
	PermanentAuthFailure,
}

/// Response headers keyed by lower-case name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseHeaders(BTreeMap<String, String>);
impl ResponseHeaders {
	/// Looks up a header by name, ignoring case.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Iterates over `(name, value)` pairs in name order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
	}

	/// Number of distinct header names.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if no headers were received.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<&HeaderMap> for ResponseHeaders {
	fn from(headers: &HeaderMap) -> Self {
		let mut map = BTreeMap::<String, String>::new();

		for (name, value) in headers {
			let value = String::from_utf8_lossy(value.as_bytes());

			map.entry(name.as_str().to_owned())
				.and_modify(|joined| {
					joined.push_str(", ");
					joined.push_str(&value);
				})
				.or_insert_with(|| value.into_owned());
		}

		Self(map)
	}
}

/// Response payload decoded according to its content type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
	/// JSON document.
	Json(serde_json::Value),
	/// Textual body.
	Text(String),
	/// Binary body.
	Bytes(Vec<u8>),
	/// No body.
	Empty,
}
impl ResponseBody {
	/// Decodes `body` using the `Content-Type` in `headers`.
	pub fn decode(headers: &HeaderMap, body: Vec<u8>) -> Self {
		if body.is_empty() {
			return Self::Empty;
		}

		let essence = headers
			.get(oauth2::http::header::CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.split(';').next())
			.map(|value| value.trim().to_ascii_lowercase());

		match essence.as_deref() {
			Some(mime) if mime == "application/json" || mime.ends_with("+json") =>
				match serde_json::from_slice(&body) {
					Ok(value) => Self::Json(value),
					Err(_) => Self::text_or_bytes(body),
				},
			Some(mime) if is_textual(mime) => Self::text_or_bytes(body),
			None => Self::text_or_bytes(body),
			Some(_) => Self::Bytes(body),
		}
	}

	/// Returns the JSON document, if the body was decoded as JSON.
	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			Self::Json(value) => Some(value),
			_ => None,
		}
	}

	/// Returns the text, if the body was decoded as text.
	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text(text) => Some(text),
			_ => None,
		}
	}

	fn text_or_bytes(body: Vec<u8>) -> Self {
		match String::from_utf8(body) {
			Ok(text) => Self::Text(text),
			Err(e) => Self::Bytes(e.into_bytes()),
		}
	}
}

/// Boundary value returned for every exchange that reached the network layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResult {
	/// `true` iff the status is in `200..=299`.
	pub ok: bool,
	/// Final status code; absent for transport failures.
	pub status_code: Option<u16>,
	/// Final response headers.
	pub headers: ResponseHeaders,
	/// Final response body.
	pub body: ResponseBody,
	/// `true` when at least one retry ran and the retry limit stopped the request.
	pub retries_exhausted: bool,
	/// URL of the last request sent, after redirects.
	pub last_requested_url: String,
	/// Every URL requested, deduplicated, in request order.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub redirect_chain: Vec<String>,
	/// Authentication failure indicator for unresolved 401s.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_failure: Option<AuthFailure>,
	/// Rendered transport error, when no response was received.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transport_error: Option<String>,
}
impl ExchangeResult {
	/// Classifies the result into exactly one terminal outcome.
	pub fn outcome(&self) -> Outcome {
		match (self.auth_failure, self.status_code) {
			(Some(AuthFailure::Permanent), _) => Outcome::PermanentAuthFailure,
			(Some(_), _) => Outcome::AuthenticationExpired,
			(None, None) => Outcome::Transport,
			(None, Some(_)) if self.ok => Outcome::Success,
			(None, Some(_)) => Outcome::Http,
		}
	}

	/// Returns the JSON body deserialized into `T`.
	pub fn json<T>(&self) -> Option<serde_json::Result<T>>
	where
		T: serde::de::DeserializeOwned,
	{
		self.body.as_json().map(|value| T::deserialize(value))
	}
}

/// How an exchange ended at the transport layer.
#[derive(Debug)]
pub enum Completion {
	/// A response was received.
	Response(TransportResponse),
	/// The transport failed or timed out.
	Transport(TransportError),
}

/// Request-side bookkeeping folded into the result.
#[derive(Clone, Debug)]
pub struct ExchangeTrace {
	/// Every URL requested, in order, possibly with repeats.
	pub requested_urls: Vec<Url>,
	/// Set by the executor when the retry limit stopped the request.
	pub retries_exhausted: bool,
	/// Set by the executor when a 401 could not be resolved.
	pub auth_failure: Option<AuthFailure>,
}
impl ExchangeTrace {
	/// Starts a trace at `url`.
	pub fn new(url: Url) -> Self {
		Self { requested_urls: vec![url], retries_exhausted: false, auth_failure: None }
	}

	/// Records another requested URL.
	pub fn push(&mut self, url: Url) {
		self.requested_urls.push(url);
	}

	/// URL of the last request sent.
	pub fn last(&self) -> Option<&Url> {
		self.requested_urls.last()
	}
}

/// Turns a [`Completion`] and its [`ExchangeTrace`] into an [`ExchangeResult`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseAdapter;
impl ResponseAdapter {
	/// Normalizes one finished exchange.
	pub fn adapt(&self, completion: Completion, trace: ExchangeTrace) -> ExchangeResult {
		let last_requested_url = trace.last().map(Url::to_string).unwrap_or_default();
		let redirect_chain = dedup_chain(&trace.requested_urls);

		match completion {
			Completion::Response(response) => ExchangeResult {
				ok: response.status.is_success(),
				status_code: Some(response.status.as_u16()),
				headers: ResponseHeaders::from(&response.headers),
				body: ResponseBody::decode(&response.headers, response.body),
				retries_exhausted: trace.retries_exhausted,
				last_requested_url,
				redirect_chain,
				auth_failure: trace.auth_failure,
				transport_error: None,
			},
			Completion::Transport(error) => ExchangeResult {
				ok: false,
				status_code: None,
				headers: ResponseHeaders::default(),
				body: ResponseBody::Empty,
				retries_exhausted: trace.retries_exhausted,
				last_requested_url,
				redirect_chain,
				auth_failure: trace.auth_failure,
				transport_error: Some(error.to_string()),
			},
		}
	}
}

fn is_textual(mime: &str) -> bool {
	mime.starts_with("text/")
		|| mime.ends_with("+xml")
		|| matches!(
			mime,
			"application/xml" | "application/javascript" | "application/x-www-form-urlencoded"
		)
}

fn dedup_chain(urls: &[Url]) -> Vec<String> {
	let mut seen = BTreeSet::new();

	urls.iter().map(Url::to_string).filter(|url| seen.insert(url.clone())).collect()
}
