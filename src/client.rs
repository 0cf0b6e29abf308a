//! Authenticated request executor and its command surface.
//!
//! [`Client::execute`] resolves the endpoint, merges headers, attaches the current credential,
//! and drives the attempt loop: 2xx returns immediately, a 401 is resolved through the
//! [`RefreshCoordinator`] and resent once, and transport failures or configured statuses are
//! retried per [`RetryPolicy`] with non-blocking delays. Redirects are followed by the executor
//! so the chain can be reported and credentials stripped on origin change.

pub mod options;
pub mod request;

pub use options::*;
pub use request::{RequestBody, RequestSpec};

// crates.io
use oauth2::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialPayload},
	error::{ConfigError, MalformedInputError, TransportError},
	http::{HttpTransport, TransportRequest},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{
		ExtendedWork, NoExtendedWork, RefreshCoordinator, RefreshExchange, RefreshOutcome,
		TokenEndpointExchange,
	},
	response::{AuthFailure, Completion, ExchangeResult, ExchangeTrace, ResponseAdapter},
	retry::{self, AttemptOutcome, AttemptRecord, RetryPolicy},
	store::{CredentialStore, MemoryStore},
};
use request::PreparedRequest;

/// Bearer-authenticated HTTP client for one backend.
///
/// Each client owns its own store, refresh coordinator, and cancellation scope; nothing is
/// shared between clients.
pub struct Client {
	base_url: Option<Url>,
	default_headers: HeaderMap,
	retry_policy: RetryPolicy,
	session: SessionConfiguration,
	transport: Arc<dyn HttpTransport>,
	store: Arc<dyn CredentialStore>,
	coordinator: Option<RefreshCoordinator>,
	authenticated: bool,
	scope: Mutex<CancellationToken>,
	adapter: ResponseAdapter,
}
impl Client {
	/// Returns a builder.
	pub fn builder() -> ClientBuilder {
		ClientBuilder::default()
	}

	/// Base URL relative endpoints are resolved against.
	pub fn base_url(&self) -> Option<&Url> {
		self.base_url.as_ref()
	}

	/// Credential store backing this client.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Refresh coordinator, when a refresh exchange is configured.
	pub fn coordinator(&self) -> Option<&RefreshCoordinator> {
		self.coordinator.as_ref()
	}

	/// Returns `true` if a credential was bootstrapped at construction.
	pub fn is_authenticated(&self) -> bool {
		self.authenticated
	}

	/// Command-surface entry point: `method` name, `endpoint`, and declarative options.
	pub async fn request(
		&self,
		method: &str,
		endpoint: &str,
		options: RequestOptions,
	) -> Result<ExchangeResult> {
		let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
			.map_err(|_| MalformedInputError::Method { method: method.to_owned() })?;

		self.execute(RequestSpec::from_options(method, endpoint, options)).await
	}

	/// Executes `spec` to completion.
	///
	/// Every network-level terminal state is an `Ok` result. Errors are reserved for malformed
	/// input, configuration and storage failures, and cancellation.
	pub async fn execute(&self, spec: RequestSpec) -> Result<ExchangeResult> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_cancellable(spec)).await;

		let outcome = match &result {
			Ok(exchange) if exchange.ok => FlowOutcome::Success,
			_ => FlowOutcome::Failure,
		};

		span.record_outcome(outcome);
		obs::record_flow_outcome(KIND, outcome);

		result
	}

	/// Logs the session out: cancels every outstanding request, resets the refresh coordinator,
	/// and clears the store.
	///
	/// The reset comes first so a flight that finishes while the store is being cleared can no
	/// longer commit its credential.
	pub async fn invalidate(&self) -> Result<()> {
		let previous = std::mem::replace(&mut *self.scope.lock(), CancellationToken::new());

		previous.cancel();
		obs::debug_event!("session invalidated");

		if let Some(coordinator) = &self.coordinator {
			coordinator.reset().await;
		}

		self.store.clear().await?;

		Ok(())
	}

	async fn execute_cancellable(&self, spec: RequestSpec) -> Result<ExchangeResult> {
		let prepared = PreparedRequest::prepare(&spec, self.base_url.as_ref(), &self.default_headers)?;
		let policy = match &spec.retry_policy {
			Some(config) => RetryPolicy::from_config(config)?.scoped_to(&prepared.method),
			None => self.retry_policy.clone(),
		};
		let timeout = spec.timeout.or_else(|| self.session.request_timeout());
		let session = self.scope.lock().child_token();
		let request = spec.cancellation.unwrap_or_default();

		tokio::select! {
			biased;
			_ = session.cancelled() => Err(Error::Cancelled),
			_ = request.cancelled() => Err(Error::Cancelled),
			result = self.run(prepared, policy, timeout) => result,
		}
	}

	async fn run(
		&self,
		request: PreparedRequest,
		policy: RetryPolicy,
		timeout: Option<StdDuration>,
	) -> Result<ExchangeResult> {
		let mut attempt = AttemptRecord::default();
		let mut refreshed = None::<Credential>;
		let mut auth_handled = false;

		loop {
			let credential = match refreshed.take() {
				Some(credential) => Some(credential),
				None if self.authenticated => self.store.load().await?,
				None => None,
			};
			let (completion, mut trace) =
				self.send_following_redirects(&request, credential.as_ref(), timeout).await?;

			if let Completion::Response(response) = &completion {
				if response.status.is_success() {
					return Ok(self.adapter.adapt(completion, trace));
				}
				if response.status == StatusCode::UNAUTHORIZED
					&& let (Some(credential), Some(coordinator)) = (&credential, &self.coordinator)
				{
					if auth_handled {
						trace.auth_failure = Some(AuthFailure::Rejected);

						return Ok(self.adapter.adapt(completion, trace));
					}

					auth_handled = true;

					match coordinator.refresh(credential).await? {
						RefreshOutcome::Refreshed(fresh) => {
							refreshed = Some(fresh);

							continue;
						},
						RefreshOutcome::Rejected { .. } => {
							trace.auth_failure = Some(AuthFailure::Permanent);

							return Ok(self.adapter.adapt(completion, trace));
						},
						RefreshOutcome::Unavailable { .. } => {
							trace.auth_failure = Some(AuthFailure::RefreshUnavailable);

							return Ok(self.adapter.adapt(completion, trace));
						},
					}
				}
			}

			let outcome = match &completion {
				Completion::Response(response) => AttemptOutcome::status(response.status.as_u16()),
				Completion::Transport(error) => AttemptOutcome::transport(error),
			};

			attempt.observe(&outcome);

			let decision = policy.should_retry(&attempt, &outcome, &request.method);

			if !decision.retry {
				trace.retries_exhausted = decision.limit_reached && attempt.attempt_number > 0;

				return Ok(self.adapter.adapt(completion, trace));
			}

			obs::record_retry(policy.kind().as_str());
			obs::debug_event!(
				attempt = attempt.attempt_number,
				status = ?outcome.status,
				delay_ms = retry::duration_millis(decision.delay),
				"scheduling retry"
			);

			tokio::time::sleep(decision.delay).await;
			attempt.advance();
		}
	}

	async fn send_following_redirects(
		&self,
		request: &PreparedRequest,
		credential: Option<&Credential>,
		timeout: Option<StdDuration>,
	) -> Result<(Completion, ExchangeTrace)> {
		let mut method = request.method.clone();
		let mut url = request.url.clone();
		let mut headers = request.headers.clone();
		let mut body = request.body.clone();
		let mut trace = ExchangeTrace::new(url.clone());
		let mut hops = 0;

		if let Some(credential) = credential {
			let mut value = HeaderValue::from_str(&credential.authorization())
				.map_err(|_| ConfigError::InvalidHeader { name: AUTHORIZATION.to_string() })?;

			value.set_sensitive(true);
			headers.insert(AUTHORIZATION, value);
		}

		loop {
			let completion = self
				.send_once(TransportRequest {
					method: method.clone(),
					url: url.clone(),
					headers: headers.clone(),
					body: body.clone(),
					timeout,
				})
				.await;
			let Completion::Response(response) = &completion else {
				return Ok((completion, trace));
			};

			if !self.session.follow_redirects || hops >= self.session.maximum_redirects {
				return Ok((completion, trace));
			}

			let Some(next) = redirect_target(&url, response.status, &response.headers) else {
				return Ok((completion, trace));
			};

			if matches!(response.status.as_u16(), 301..=303)
				&& method != Method::GET
				&& method != Method::HEAD
			{
				method = Method::GET;
				body = None;

				headers.remove(CONTENT_TYPE);
				headers.remove(CONTENT_LENGTH);
			}
			if next.origin() != url.origin() {
				headers.remove(AUTHORIZATION);
			}

			url = next;
			hops += 1;

			trace.push(url.clone());
		}
	}

	async fn send_once(&self, request: TransportRequest) -> Completion {
		let timeout = request.timeout;
		let send = self.transport.send(request);
		let result = match timeout {
			Some(after) => tokio::time::timeout(after, send)
				.await
				.unwrap_or_else(|_| Err(TransportError::Timeout { after })),
			None => send.await,
		};

		match result {
			Ok(response) => Completion::Response(response),
			Err(error) => Completion::Transport(error),
		}
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("base_url", &self.base_url.as_ref().map(Url::as_str))
			.field("retry_policy", &self.retry_policy)
			.field("follow_redirects", &self.session.follow_redirects)
			.field("authenticated", &self.authenticated)
			.finish_non_exhaustive()
	}
}

/// Builder for [`Client`]. Building is async because session bootstrap touches the store.
#[derive(Default)]
pub struct ClientBuilder {
	base_url: Option<String>,
	options: ClientOptions,
	store: Option<Arc<dyn CredentialStore>>,
	transport: Option<Arc<dyn HttpTransport>>,
	auth: Option<AuthConfiguration>,
	exchange: Option<Arc<dyn RefreshExchange>>,
	extended_work: Option<Arc<dyn ExtendedWork>>,
}
impl ClientBuilder {
	/// Sets the base URL relative endpoints resolve against.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());

		self
	}

	/// Replaces all client options.
	pub fn options(mut self, options: ClientOptions) -> Self {
		self.options = options;

		self
	}

	/// Adds a client-wide default header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.options.headers.insert(name.into(), value.into());

		self
	}

	/// Sets the client-wide retry policy.
	pub fn retry_policy(mut self, config: crate::retry::RetryPolicyConfig) -> Self {
		self.options.retry_policy_configuration = Some(config);

		self
	}

	/// Sets the session configuration.
	pub fn session(mut self, session: SessionConfiguration) -> Self {
		self.options.session_configuration = session;

		self
	}

	/// Uses `store` for the credential (defaults to a [`MemoryStore`]).
	pub fn store(mut self, store: impl CredentialStore + 'static) -> Self {
		self.store = Some(Arc::new(store));

		self
	}

	/// Uses a shared store handle.
	pub fn shared_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Uses `transport` for every request (defaults to reqwest when the feature is enabled).
	pub fn transport(mut self, transport: impl HttpTransport) -> Self {
		self.transport = Some(Arc::new(transport));

		self
	}

	/// Refreshes credentials against the token endpoint described by `auth`.
	pub fn auth(mut self, auth: AuthConfiguration) -> Self {
		self.auth = Some(auth);

		self
	}

	/// Uses a custom refresh exchange instead of the token endpoint.
	pub fn refresh_exchange(mut self, exchange: impl RefreshExchange) -> Self {
		self.exchange = Some(Arc::new(exchange));

		self
	}

	/// Calls `hook` around each refresh exchange.
	pub fn extended_work(mut self, hook: impl ExtendedWork + 'static) -> Self {
		self.extended_work = Some(Arc::new(hook));

		self
	}

	/// Validates the configuration, bootstraps the session credential, and builds the client.
	pub async fn build(self) -> Result<Client> {
		let base_url = self
			.base_url
			.map(|raw| {
				Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidEndpoint { url: raw, source })
			})
			.transpose()?;
		let default_headers = default_headers(&self.options.headers)?;
		let retry_policy = RetryPolicy::from_config(
			&self.options.retry_policy_configuration.clone().unwrap_or_default(),
		)?;
		let session = self.options.session_configuration;
		let transport = match self.transport {
			Some(transport) => transport,
			None => default_transport()?,
		};
		let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::default()));
		let exchange = match (self.exchange, self.auth) {
			(Some(exchange), _) => Some(exchange),
			(None, Some(auth)) => {
				let mut exchange =
					TokenEndpointExchange::<dyn HttpTransport>::new(&auth.base_url, auth.client_id, transport.clone())?;

				if let Some(timeout) = session.request_timeout() {
					exchange = exchange.with_timeout(timeout);
				}

				Some(Arc::new(exchange) as Arc<dyn RefreshExchange>)
			},
			(None, None) => None,
		};
		let authenticated = bootstrap(&session, store.as_ref()).await?;
		let coordinator = exchange.map(|exchange| {
			RefreshCoordinator::new(
				store.clone(),
				exchange,
				self.extended_work.unwrap_or_else(|| Arc::new(NoExtendedWork)),
			)
		});

		if authenticated && coordinator.is_none() {
			return Err(ConfigError::MissingAuthConfiguration.into());
		}

		Ok(Client {
			base_url,
			default_headers,
			retry_policy,
			session,
			transport,
			store,
			coordinator,
			authenticated,
			scope: Mutex::new(CancellationToken::new()),
			adapter: ResponseAdapter,
		})
	}
}
impl Debug for ClientBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientBuilder")
			.field("base_url", &self.base_url)
			.field("auth", &self.auth)
			.finish_non_exhaustive()
	}
}

// `apiToken` wins over the store; only one user is ever logged in per client.
async fn bootstrap(session: &SessionConfiguration, store: &dyn CredentialStore) -> Result<bool> {
	if let Some(raw) = &session.api_token {
		let payload: CredentialPayload =
			serde_json::from_str(raw).map_err(ConfigError::InvalidApiToken)?;
		let credential = Credential::from_payload(payload, OffsetDateTime::now_utc())
			.map_err(ConfigError::from)?;

		store.clear().await?;
		store.save(credential).await?;

		return Ok(true);
	}
	if session.should_retrieve_token {
		return Ok(store.load().await?.is_some());
	}

	Ok(false)
}

fn default_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
	let mut map = HeaderMap::new();

	for (name, value) in headers {
		let invalid = || ConfigError::InvalidHeader { name: name.clone() };
		let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
		let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;

		map.insert(header_name, header_value);
	}

	Ok(map)
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	Ok(Arc::new(crate::http::ReqwestTransport::new()?))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	Err(ConfigError::MissingTransport)
}

fn redirect_target(current: &Url, status: StatusCode, headers: &HeaderMap) -> Option<Url> {
	if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
		return None;
	}

	let location = headers.get(LOCATION)?.to_str().ok()?;

	current.join(location.trim()).ok().filter(|url| matches!(url.scheme(), "http" | "https"))
}
