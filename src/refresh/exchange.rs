//! Refresh-token exchange against the backend token endpoint.

// crates.io
use oauth2::{
	AuthType, Client as OAuthClient, ClientId, EndpointNotSet, EndpointSet, ExtraTokenFields,
	HttpClientError, RefreshToken, RequestTokenError, StandardRevocableToken,
	StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError,
		BasicRevocationErrorResponse, BasicTokenIntrospectionResponse, BasicTokenType,
	},
};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::{ConfigError, TransientError, TransportError},
	http::{HttpTransport, ResponseMetadata, ResponseMetadataSlot, TransportHandle},
};

type TokenEndpointResponse = StandardTokenResponse<SubjectFields, BasicTokenType>;
type TokenEndpointClient = OAuthClient<
	BasicErrorResponse,
	TokenEndpointResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Boxed future returned by [`RefreshExchange::refresh`].
pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Performs one refresh-token exchange.
///
/// Implementations report a server-confirmed revoked refresh token as [`Error::InvalidGrant`].
/// Every other error is treated as transient by the coordinator.
pub trait RefreshExchange
where
	Self: 'static + Send + Sync,
{
	/// Exchanges the refresh token of `current` for a new credential.
	fn refresh<'a>(&'a self, current: &'a Credential) -> ExchangeFuture<'a>;
}

/// Non-standard fields the token endpoint returns alongside the OAuth response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectFields {
	/// Identifier of the user the tokens belong to; numeric or string.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<serde_json::Value>,
}
impl ExtraTokenFields for SubjectFields {}

/// [`RefreshExchange`] that posts `grant_type=refresh_token` to `<base>/token`.
///
/// The request carries `client_id` and `refresh_token` as form fields and is sent through the
/// same [`HttpTransport`] as regular requests.
pub struct TokenEndpointExchange<T>
where
	T: ?Sized + HttpTransport,
{
	oauth_client: TokenEndpointClient,
	transport: Arc<T>,
	timeout: Option<StdDuration>,
}
impl<T> TokenEndpointExchange<T>
where
	T: ?Sized + HttpTransport,
{
	/// Builds an exchange for the token endpoint under `base_url`.
	pub fn new(
		base_url: &Url,
		client_id: impl Into<String>,
		transport: impl Into<Arc<T>>,
	) -> Result<Self, ConfigError> {
		let token_url = format!("{}/token", base_url.as_str().trim_end_matches('/'));
		let token_url = TokenUrl::new(token_url.clone())
			.map_err(|source| ConfigError::InvalidEndpoint { url: token_url, source })?;
		let oauth_client = OAuthClient::new(ClientId::new(client_id.into()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { oauth_client, transport: transport.into(), timeout: None })
	}

	/// Bounds each token request by `timeout`.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Absolute token endpoint URL.
	pub fn token_url(&self) -> &str {
		self.oauth_client.token_uri().as_str()
	}
}
impl<T> RefreshExchange for TokenEndpointExchange<T>
where
	T: ?Sized + HttpTransport,
{
	fn refresh<'a>(&'a self, current: &'a Credential) -> ExchangeFuture<'a> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = TransportHandle::new(self.transport.clone(), meta.clone(), self.timeout);
			let secret = RefreshToken::new(current.refresh_token().expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&secret)
				.request_async(&handle)
				.await
				.map_err(|err| map_request_error(meta.take(), err))?;

			credential_from_response(current, &response, OffsetDateTime::now_utc())
		})
	}
}
impl<T> Debug for TokenEndpointExchange<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpointExchange")
			.field("token_url", &self.token_url())
			.field("timeout", &self.timeout)
			.finish_non_exhaustive()
	}
}

fn credential_from_response(
	previous: &Credential,
	response: &TokenEndpointResponse,
	issued_at: OffsetDateTime,
) -> Result<Credential> {
	let expires_in = match response.expires_in() {
		Some(lifetime) => i64::try_from(lifetime.as_secs())
			.map_err(|_| ConfigError::ExpiresInOutOfRange)?,
		None => Credential::DEFAULT_EXPIRES_IN_SECS,
	};
	let token_type = match response.token_type() {
		BasicTokenType::Bearer => Credential::DEFAULT_TOKEN_TYPE.to_owned(),
		BasicTokenType::Mac => "MAC".to_owned(),
		BasicTokenType::Extension(custom) => custom.clone(),
	};
	// A rotation-less response keeps the previous refresh token and subject.
	let refresh_token = response
		.refresh_token()
		.map(|token| token.secret().to_owned())
		.unwrap_or_else(|| previous.refresh_token().expose().to_owned());
	let subject = match &response.extra_fields().user_id {
		Some(serde_json::Value::String(id)) => id.clone(),
		Some(serde_json::Value::Null) | None => previous.subject_id().to_owned(),
		Some(other) => other.to_string(),
	};
	let mut builder = Credential::builder()
		.access_token(response.access_token().secret().to_owned())
		.refresh_token(refresh_token)
		.token_type(token_type)
		.expires_in(Duration::seconds(expires_in))
		.issued_at(issued_at)
		.subject_id(subject);
	let scope = response
		.scopes()
		.map(|scopes| scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" "))
		.or_else(|| previous.scope().map(ToOwned::to_owned));

	if let Some(scope) = scope {
		builder = builder.scope(scope);
	}

	builder.build().map_err(|e| ConfigError::from(e).into())
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<TransportError>>,
) -> Error {
	let status = meta.and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) => match response.error() {
			BasicErrorResponseType::InvalidGrant => Error::InvalidGrant {
				reason: response
					.error_description()
					.cloned()
					.unwrap_or_else(|| BasicErrorResponseType::InvalidGrant.as_ref().to_owned()),
			},
			other => TransientError::TokenEndpoint {
				message: format!("OAuth error `{}`", other.as_ref()),
				status,
			}
			.into(),
		},
		RequestTokenError::Request(error) => map_transport_error(error, status),
		RequestTokenError::Parse(source, _body) =>
			TransientError::TokenResponseParse { source, status }.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint { message, status }.into(),
	}
}

fn map_transport_error(err: HttpClientError<TransportError>, status: Option<u16>) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => Error::Transport(*inner),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Http(inner) => TransportError::network(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint { message, status }.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status,
		}
		.into(),
	}
}
