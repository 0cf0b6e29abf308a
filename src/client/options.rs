//! Declarative option structs accepted by the client and its command surface.
//!
//! Keys are camelCase; every omitted key takes the documented default and unknown keys are
//! ignored.

// self
use crate::{_prelude::*, retry::RetryPolicyConfig};

/// Client-wide options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
	/// Headers sent with every request. Per-request headers win on collision.
	pub headers: BTreeMap<String, String>,
	/// Client-wide retry policy. Defaults to [`RetryPolicyConfig::default`].
	pub retry_policy_configuration: Option<RetryPolicyConfig>,
	/// Session bootstrap and transport behavior.
	pub session_configuration: SessionConfiguration,
}

/// Session bootstrap and per-session transport behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfiguration {
	/// JSON credential payload supplied by the application. When present, the store is cleared
	/// and this credential saved in its place.
	pub api_token: Option<String>,
	/// Load the credential from the store when no `apiToken` is given.
	pub should_retrieve_token: bool,
	/// Default per-attempt timeout in milliseconds.
	pub timeout_interval_for_request: Option<u64>,
	/// Follow 3xx responses carrying a `Location` header.
	pub follow_redirects: bool,
	/// Maximum number of redirects followed per attempt.
	pub maximum_redirects: u32,
}
impl SessionConfiguration {
	/// Default redirect limit.
	pub const DEFAULT_MAXIMUM_REDIRECTS: u32 = 10;

	/// Default per-attempt timeout, if configured.
	pub fn request_timeout(&self) -> Option<StdDuration> {
		self.timeout_interval_for_request.map(StdDuration::from_millis)
	}
}
impl Default for SessionConfiguration {
	fn default() -> Self {
		Self {
			api_token: None,
			should_retrieve_token: false,
			timeout_interval_for_request: None,
			follow_redirects: true,
			maximum_redirects: Self::DEFAULT_MAXIMUM_REDIRECTS,
		}
	}
}

/// Token endpoint used for refresh exchanges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfiguration {
	/// Base URL of the authorization server; refreshes post to `<baseUrl>/token`.
	pub base_url: Url,
	/// Fixed client identifier sent with each refresh.
	pub client_id: String,
}
impl AuthConfiguration {
	/// Builds a configuration for `base_url` and `client_id`.
	pub fn new(base_url: Url, client_id: impl Into<String>) -> Self {
		Self { base_url, client_id: client_id.into() }
	}
}

/// Per-request options of the command surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
	/// Request headers.
	pub headers: BTreeMap<String, String>,
	/// Request body. An explicit `null` sends an empty body; a string is sent as text; any other
	/// value is sent as JSON.
	#[serde(deserialize_with = "deserialize_present")]
	pub body: Option<serde_json::Value>,
	/// Per-attempt timeout in milliseconds.
	pub timeout_interval: Option<u64>,
	/// Per-request retry policy, scoped to this request's method.
	pub retry_policy_configuration: Option<RetryPolicyConfig>,
}

// Keeps `"body": null` distinct from an absent key.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	serde_json::Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn session_defaults_apply_to_empty_object() {
		let options: ClientOptions =
			serde_json::from_str("{}").expect("Empty options should deserialize.");

		assert_eq!(options.session_configuration, SessionConfiguration::default());
		assert!(options.session_configuration.follow_redirects);
		assert_eq!(options.session_configuration.maximum_redirects, 10);
		assert!(options.retry_policy_configuration.is_none());
	}

	#[test]
	fn request_body_null_differs_from_absent() {
		let absent: RequestOptions =
			serde_json::from_str(r#"{"timeoutInterval":250}"#).expect("Options should parse.");
		let null: RequestOptions =
			serde_json::from_str(r#"{"body":null}"#).expect("Options should parse.");

		assert_eq!(absent.body, None);
		assert_eq!(absent.timeout_interval, Some(250));
		assert_eq!(null.body, Some(serde_json::Value::Null));
	}

	#[test]
	fn session_keys_are_camel_case() {
		let session: SessionConfiguration = serde_json::from_str(
			r#"{"shouldRetrieveToken":true,"timeoutIntervalForRequest":1500,"unknown":1}"#,
		)
		.expect("Session should parse.");

		assert!(session.should_retrieve_token);
		assert_eq!(session.request_timeout(), Some(StdDuration::from_millis(1_500)));
	}
}
