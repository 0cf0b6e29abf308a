//! Immutable bearer credential, its builder, and the untrusted wire payload.

// self
use crate::{_prelude::*, auth::secret::TokenSecret};

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when the access token is absent or empty.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the refresh token is absent or empty.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
	/// Issued when the relative lifetime is zero or negative.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}

/// Bearer access/refresh token pair with a derived expiry.
///
/// Credentials are replaced, never mutated: a refresh produces a new value and the store swaps
/// it in. `expires_at` is always computed from `issued_at + expires_in` by the builder, so no
/// setter accepts an absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	access_token: TokenSecret,
	refresh_token: TokenSecret,
	token_type: String,
	expires_in: i64,
	issued_at: OffsetDateTime,
	expires_at: OffsetDateTime,
	subject_id: String,
	scope: Option<String>,
}
impl Credential {
	/// Token type used when the server omits one.
	pub const DEFAULT_TOKEN_TYPE: &'static str = "Bearer";
	/// Lifetime in seconds used when the server omits `expires_in`.
	pub const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

	/// Returns a builder for constructing credentials.
	pub fn builder() -> CredentialBuilder {
		CredentialBuilder::default()
	}

	/// Issues a credential from an untrusted payload, stamping the expiry relative to `issued_at`.
	pub fn from_payload(
		payload: CredentialPayload,
		issued_at: OffsetDateTime,
	) -> Result<Self, CredentialBuilderError> {
		let mut builder = Self::builder()
			.access_token(payload.access_token)
			.refresh_token(payload.refresh_token)
			.token_type(payload.token_type)
			.expires_in(Duration::seconds(payload.expires_in))
			.issued_at(issued_at);

		if let Some(subject) = payload.user_id {
			builder = builder.subject_id(subject);
		}
		if let Some(scope) = payload.scope {
			builder = builder.scope(scope);
		}

		builder.build()
	}

	/// Access token secret; callers must avoid logging it.
	pub fn access_token(&self) -> &TokenSecret {
		&self.access_token
	}

	/// Refresh token secret.
	pub fn refresh_token(&self) -> &TokenSecret {
		&self.refresh_token
	}

	/// Authorization scheme, normally `Bearer`.
	pub fn token_type(&self) -> &str {
		&self.token_type
	}

	/// Relative lifetime in seconds as reported at issue time.
	pub fn expires_in(&self) -> i64 {
		self.expires_in
	}

	/// Instant the credential was issued.
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Instant the credential expires.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Opaque identifier of the user the credential belongs to.
	pub fn subject_id(&self) -> &str {
		&self.subject_id
	}

	/// Space-delimited scope string, if the server returned one.
	pub fn scope(&self) -> Option<&str> {
		self.scope.as_deref()
	}

	/// Value for the `Authorization` header.
	pub fn authorization(&self) -> String {
		format!("{} {}", self.token_type, self.access_token.expose())
	}

	/// Returns `true` if the credential has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if this credential was issued after `other`, meaning `other` is stale.
	pub fn supersedes(&self, other: &Credential) -> bool {
		self.expires_at > other.expires_at
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("subject_id", &self.subject_id)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone, Debug, Default)]
pub struct CredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	expires_in: Option<Duration>,
	issued_at: Option<OffsetDateTime>,
	subject_id: Option<String>,
	scope: Option<String>,
}
impl CredentialBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the authorization scheme. `bearer` in any case is normalized to `Bearer`.
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(normalize_token_type(token_type.into()));

		self
	}

	/// Sets the relative lifetime (defaults to 7200 seconds).
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the issued-at instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets the opaque subject identifier.
	pub fn subject_id(mut self, subject: impl Into<String>) -> Self {
		self.subject_id = Some(subject.into());

		self
	}

	/// Sets the scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_empty())
			.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let refresh_token = self
			.refresh_token
			.filter(|token| !token.is_empty())
			.ok_or(CredentialBuilderError::MissingRefreshToken)?;
		let expires_in =
			self.expires_in.unwrap_or(Duration::seconds(Credential::DEFAULT_EXPIRES_IN_SECS));

		if !expires_in.is_positive() {
			return Err(CredentialBuilderError::NonPositiveExpiresIn);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);

		Ok(Credential {
			access_token,
			refresh_token,
			token_type: self.token_type.unwrap_or_else(|| Credential::DEFAULT_TOKEN_TYPE.into()),
			expires_in: expires_in.whole_seconds(),
			issued_at,
			expires_at: issued_at + expires_in,
			subject_id: self.subject_id.unwrap_or_default(),
			scope: self.scope,
		})
	}
}

/// Credential fields as they arrive from untrusted input (token endpoint or session bootstrap).
///
/// Any absolute expiry present in the input is ignored.
#[derive(Clone, Deserialize)]
pub struct CredentialPayload {
	/// Access token value.
	pub access_token: String,
	/// Refresh token value.
	pub refresh_token: String,
	/// Authorization scheme.
	#[serde(default = "default_token_type")]
	pub token_type: String,
	/// Lifetime in seconds.
	#[serde(default = "default_expires_in")]
	pub expires_in: i64,
	/// Subject identifier; numbers and strings are both accepted.
	#[serde(default, deserialize_with = "deserialize_subject")]
	pub user_id: Option<String>,
	/// Scope string.
	#[serde(default)]
	pub scope: Option<String>,
}
impl Debug for CredentialPayload {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPayload")
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("user_id", &self.user_id)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

fn default_token_type() -> String {
	Credential::DEFAULT_TOKEN_TYPE.into()
}

fn default_expires_in() -> i64 {
	Credential::DEFAULT_EXPIRES_IN_SECS
}

fn deserialize_subject<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;

	Ok(match value {
		None | Some(serde_json::Value::Null) => None,
		Some(serde_json::Value::String(s)) => Some(s),
		Some(other) => Some(other.to_string()),
	})
}

pub(crate) fn normalize_token_type(raw: String) -> String {
	if raw.eq_ignore_ascii_case("bearer") { Credential::DEFAULT_TOKEN_TYPE.into() } else { raw }
}
