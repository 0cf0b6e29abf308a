//! Transport primitives shared by the request executor and the refresh exchange.
//!
//! The module exposes [`HttpTransport`] as the client's only dependency on an HTTP stack. The
//! executor drives every attempt (timeouts, redirects, retries) itself, so transports issue
//! exactly one request per call and must not follow redirects on their own.
//!
//! The refresh exchange reuses the same transport through an [`AsyncHttpClient`] adapter that
//! records the response status in a [`ResponseMetadataSlot`] so token-endpoint failures can be
//! classified with consistent metadata.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
// self
use crate::{_prelude::*, error::TransportError};
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + 'a + Send>>;

/// One outbound HTTP request as seen by a transport.
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Fully merged headers, including `Authorization` when a credential applies.
	pub headers: HeaderMap,
	/// Request body. `Some(vec![])` is an explicit empty body and must be sent with
	/// `Content-Length: 0`; `None` sends no body at all.
	pub body: Option<Vec<u8>>,
	/// Per-attempt timeout hint. The executor enforces it independently.
	pub timeout: Option<StdDuration>,
}

/// One inbound HTTP response as produced by a transport.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
	/// URL that produced this response.
	pub url: Url,
}

/// Abstraction over HTTP stacks capable of executing a single request.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the
/// executor and the refresh exchange, and the returned futures must be `Send` so requests can
/// run on any executor thread.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves with the response, without following redirects.
	fn send(&self, request: TransportRequest) -> TransportFuture<'_>;
}
impl<T> HttpTransport for Arc<T>
where
	T: ?Sized + HttpTransport,
{
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		(**self).send(request)
	}
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
///
/// The refresh exchange creates a fresh slot for each token request and reads the captured
/// metadata immediately after `oauth2` resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// [`AsyncHttpClient`] adapter that routes `oauth2` token requests through an [`HttpTransport`].
pub(crate) struct TransportHandle<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	slot: ResponseMetadataSlot,
	timeout: Option<StdDuration>,
}
impl<T> TransportHandle<T>
where
	T: ?Sized + HttpTransport,
{
	pub(crate) fn new(
		transport: Arc<T>,
		slot: ResponseMetadataSlot,
		timeout: Option<StdDuration>,
	) -> Self {
		Self { transport, slot, timeout }
	}
}
impl<'c, T> AsyncHttpClient<'c> for TransportHandle<T>
where
	T: ?Sized + HttpTransport,
{
	type Error = HttpClientError<TransportError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let (parts, body) = request.into_parts();
			let url = Url::parse(&parts.uri.to_string()).map_err(|e| {
				HttpClientError::Other(format!("Token request URI is invalid: {e}."))
			})?;
			let request = TransportRequest {
				method: parts.method,
				url,
				headers: parts.headers,
				body: Some(body),
				timeout: self.timeout,
			};
			let send = self.transport.send(request);
			let response = match self.timeout {
				Some(after) => tokio::time::timeout(after, send)
					.await
					.map_err(|_| Box::new(TransportError::Timeout { after }))?,
				None => send.await,
			}
			.map_err(Box::new)?;

			self.slot.store(ResponseMetadata { status: Some(response.status.as_u16()) });

			let mut converted = HttpResponse::new(response.body);

			*converted.status_mut() = response.status;
			*converted.headers_mut() = response.headers;

			Ok(converted)
		})
	}
}

/// [`HttpTransport`] backed by a reqwest [`ReqwestClient`].
///
/// Clients built through [`ReqwestTransport::new`] never follow redirects. Callers supplying their
/// own client through [`ReqwestTransport::with_client`] must disable redirect following as well,
/// otherwise the executor cannot report the redirect chain or strip credentials on origin change.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a transport with redirect following disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let timeout = request.timeout;
			let mut builder = client.request(request.method, request.url).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}
			if let Some(after) = timeout {
				builder = builder.timeout(after);
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(e, timeout))?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let url = response.url().to_owned();
			let body = response.bytes().await.map_err(|e| map_reqwest_error(e, timeout))?.to_vec();

			Ok(TransportResponse { status, headers, body, url })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: ReqwestError, timeout: Option<StdDuration>) -> TransportError {
	match timeout {
		Some(after) if err.is_timeout() => TransportError::Timeout { after },
		_ => TransportError::from(err),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Echo;
	impl HttpTransport for Echo {
		fn send(&self, request: TransportRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				Ok(TransportResponse {
					status: StatusCode::OK,
					headers: HeaderMap::new(),
					body: request.body.unwrap_or_default(),
					url: request.url,
				})
			})
		}
	}

	#[test]
	fn metadata_slot_take_consumes() {
		let slot = ResponseMetadataSlot::default();

		slot.store(ResponseMetadata { status: Some(400) });

		assert_eq!(slot.take().and_then(|meta| meta.status), Some(400));
		assert!(slot.take().is_none());
	}

	#[tokio::test]
	async fn handle_records_status_and_forwards_body() {
		let slot = ResponseMetadataSlot::default();
		let handle = TransportHandle::new(Arc::new(Echo), slot.clone(), None);
		let request = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri("https://auth.example.com/token")
			.body(b"grant_type=refresh_token".to_vec())
			.expect("Fixture request should build.");
		let response = handle.call(request).await.expect("Echo transport should respond.");

		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(response.body().as_slice(), b"grant_type=refresh_token");
		assert_eq!(slot.take().and_then(|meta| meta.status), Some(200));
	}
}
