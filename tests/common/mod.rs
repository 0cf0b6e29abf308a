//! Shared fixtures for the integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use bearer_client::{
	auth::Credential,
	error::{Error, Result, TransportError},
	http::{HttpTransport, TransportFuture, TransportRequest, TransportResponse},
	oauth2::http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
	refresh::{ExchangeFuture, RefreshExchange},
};
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// One scripted transport reaction.
#[derive(Clone, Debug)]
pub enum Reply {
	Respond { status: u16, headers: Vec<(&'static str, String)>, body: Vec<u8> },
	Fail,
	Hang,
}
impl Reply {
	pub fn status(status: u16) -> Self {
		Self::Respond { status, headers: Vec::new(), body: Vec::new() }
	}

	pub fn json(status: u16, body: &str) -> Self {
		Self::status(status).header("content-type", "application/json").body(body)
	}

	pub fn redirect(status: u16, location: &str) -> Self {
		Self::status(status).header("location", location)
	}

	pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
		if let Self::Respond { headers, .. } = &mut self {
			headers.push((name, value.into()));
		}

		self
	}

	pub fn body(mut self, value: &str) -> Self {
		if let Self::Respond { body, .. } = &mut self {
			*body = value.as_bytes().to_vec();
		}

		self
	}
}

type Responder = dyn Fn(&TransportRequest) -> Reply + Send + Sync;

/// In-memory transport that answers from a queue, then from a fallback responder, and records
/// every request it receives.
#[derive(Clone)]
pub struct ScriptedTransport {
	queue: Arc<Mutex<VecDeque<Reply>>>,
	fallback: Arc<Responder>,
	seen: Arc<Mutex<Vec<TransportRequest>>>,
}
impl ScriptedTransport {
	pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
		Self::with_fallback(replies, |_| Reply::status(200))
	}

	pub fn responding(responder: impl Fn(&TransportRequest) -> Reply + Send + Sync + 'static) -> Self {
		Self::with_fallback([], responder)
	}

	pub fn with_fallback(
		replies: impl IntoIterator<Item = Reply>,
		responder: impl Fn(&TransportRequest) -> Reply + Send + Sync + 'static,
	) -> Self {
		Self {
			queue: Arc::new(Mutex::new(replies.into_iter().collect())),
			fallback: Arc::new(responder),
			seen: Arc::new(Mutex::new(Vec::new())),
		}
	}

	pub fn requests(&self) -> Vec<TransportRequest> {
		self.seen.lock().clone()
	}

	pub fn calls(&self) -> usize {
		self.seen.lock().len()
	}
}
impl HttpTransport for ScriptedTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		let reply = self.queue.lock().pop_front().unwrap_or_else(|| (self.fallback)(&request));
		let url = request.url.clone();

		self.seen.lock().push(request);

		Box::pin(async move {
			match reply {
				Reply::Respond { status, headers, body } => {
					let mut map = HeaderMap::new();

					for (name, value) in headers {
						map.append(
							HeaderName::from_static(name),
							HeaderValue::from_str(&value).expect("Scripted header should be valid."),
						);
					}

					Ok(TransportResponse {
						status: StatusCode::from_u16(status).expect("Scripted status should be valid."),
						headers: map,
						body,
						url,
					})
				},
				Reply::Fail => Err(TransportError::network(std::io::Error::other("connection reset"))),
				Reply::Hang => std::future::pending().await,
			}
		})
	}
}

/// Responds 200 to `Bearer <token>` and 401 to anything else.
pub fn accepts_only(token: &'static str) -> impl Fn(&TransportRequest) -> Reply + Send + Sync {
	move |request| {
		let expected = format!("Bearer {token}");

		match request.headers.get("authorization").and_then(|value| value.to_str().ok()) {
			Some(actual) if actual == expected => Reply::json(200, r#"{"ok":true}"#),
			_ => Reply::status(401),
		}
	}
}

pub fn authorization(request: &TransportRequest) -> Option<String> {
	request.headers.get("authorization").and_then(|value| value.to_str().ok()).map(ToOwned::to_owned)
}

pub fn credential(access: &str, issued_at: OffsetDateTime) -> Credential {
	Credential::builder()
		.access_token(access)
		.refresh_token(format!("{access}-refresh"))
		.issued_at(issued_at)
		.subject_id("42")
		.build()
		.expect("Credential fixture should build.")
}

pub fn api_token(access: &str) -> String {
	format!(
		r#"{{"access_token":"{access}","refresh_token":"{access}-refresh","token_type":"Bearer","expires_in":3600,"user_id":42}}"#
	)
}

/// Refresh exchange that sleeps for `delay`, counts its calls, and answers with `reply`.
///
/// Clones share the call counter.
#[derive(Clone)]
pub struct CountingExchange {
	calls: Arc<AtomicUsize>,
	delay: StdDuration,
	reply: fn(&Credential) -> Result<Credential>,
}
impl CountingExchange {
	pub fn new(delay: StdDuration, reply: fn(&Credential) -> Result<Credential>) -> Self {
		Self { calls: Arc::new(AtomicUsize::new(0)), delay, reply }
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RefreshExchange for CountingExchange {
	fn refresh<'a>(&'a self, current: &'a Credential) -> ExchangeFuture<'a> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(self.delay).await;

			(self.reply)(current)
		})
	}
}

pub fn rotate_to_fresh(current: &Credential) -> Result<Credential> {
	Ok(credential("fresh", current.issued_at() + Duration::minutes(5)))
}

pub fn revoke(_: &Credential) -> Result<Credential> {
	Err(Error::InvalidGrant { reason: "revoked".into() })
}

pub fn unreachable_endpoint(_: &Credential) -> Result<Credential> {
	Err(TransportError::network(std::io::Error::other("token endpoint unreachable")).into())
}
