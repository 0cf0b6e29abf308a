mod common;

// std
use std::time::Duration as StdDuration;
// crates.io
use bearer_client::{
	client::{Client, RequestSpec, SessionConfiguration},
	error::{ConfigError, Error},
	refresh::RefreshPhase,
	response::{AuthFailure, Outcome},
	retry::RetryPolicyConfig,
	store::MemoryStore,
};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
// self
use common::*;

fn session_with(access: &str) -> SessionConfiguration {
	SessionConfiguration { api_token: Some(api_token(access)), ..Default::default() }
}

async fn client(
	transport: &ScriptedTransport,
	store: &MemoryStore,
	exchange: &CountingExchange,
) -> Client {
	Client::builder()
		.base_url("https://api.example.com/v1")
		.session(session_with("stale"))
		.transport(transport.clone())
		.store(store.clone())
		.refresh_exchange(exchange.clone())
		.build()
		.await
		.expect("Client should build.")
}

#[tokio::test]
async fn concurrent_401s_trigger_one_refresh() {
	let transport = ScriptedTransport::responding(accepts_only("fresh"));
	let store = MemoryStore::default();
	let exchange = CountingExchange::new(StdDuration::from_millis(50), rotate_to_fresh);
	let client = client(&transport, &store, &exchange).await;
	let (a, b, c, d) = tokio::join!(
		client.execute(RequestSpec::get("me")),
		client.execute(RequestSpec::get("me/feed")),
		client.execute(RequestSpec::get("me/likes")),
		client.execute(RequestSpec::get("me/friends")),
	);

	for result in [a, b, c, d] {
		let result = result.expect("Request should produce a result.");

		assert_eq!(result.outcome(), Outcome::Success);
		assert_eq!(result.status_code, Some(200));
	}

	assert_eq!(exchange.calls(), 1);
	assert_eq!(transport.calls(), 8);
	assert_eq!(
		store.snapshot().expect("Store should hold the refreshed credential.").access_token().expose(),
		"fresh"
	);

	let coordinator = client.coordinator().expect("Coordinator should be configured.");

	assert_eq!(coordinator.metrics().exchanges(), 1);
	assert_eq!(coordinator.phase().await, RefreshPhase::Idle);

	for request in transport.requests().iter().skip(4) {
		assert_eq!(authorization(request).as_deref(), Some("Bearer fresh"));
	}
}

#[tokio::test]
async fn revoked_refresh_token_clears_store_once_and_fails_every_waiter() {
	let transport = ScriptedTransport::responding(accepts_only("fresh"));
	let store = MemoryStore::default();
	let exchange = CountingExchange::new(StdDuration::from_millis(50), revoke);
	let client = client(&transport, &store, &exchange).await;
	let (a, b, c) = tokio::join!(
		client.execute(RequestSpec::get("a")),
		client.execute(RequestSpec::get("b")),
		client.execute(RequestSpec::get("c")),
	);

	for result in [a, b, c] {
		let result = result.expect("Request should produce a result.");

		assert_eq!(result.outcome(), Outcome::PermanentAuthFailure);
		assert_eq!(result.auth_failure, Some(AuthFailure::Permanent));
		assert_eq!(result.status_code, Some(401));
		assert!(!result.ok);
	}

	assert_eq!(exchange.calls(), 1);
	assert!(store.snapshot().is_none());
	assert_eq!(client.coordinator().map(|c| c.metrics().rejections()), Some(1));
}

#[tokio::test]
async fn unreachable_token_endpoint_keeps_the_credential() {
	let transport = ScriptedTransport::responding(accepts_only("fresh"));
	let store = MemoryStore::default();
	let exchange = CountingExchange::new(StdDuration::ZERO, unreachable_endpoint);
	let client = client(&transport, &store, &exchange).await;
	let result = client.execute(RequestSpec::get("me")).await.expect("Request should produce a result.");

	assert_eq!(result.outcome(), Outcome::AuthenticationExpired);
	assert_eq!(result.auth_failure, Some(AuthFailure::RefreshUnavailable));
	assert_eq!(
		store.snapshot().expect("Credential should be kept.").access_token().expose(),
		"stale"
	);
	assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_leaves_the_shared_refresh_running() {
	let transport = ScriptedTransport::responding(accepts_only("fresh"));
	let store = MemoryStore::default();
	let exchange = CountingExchange::new(StdDuration::from_millis(50), rotate_to_fresh);
	let client = client(&transport, &store, &exchange).await;
	let token = CancellationToken::new();
	let (first, second, ()) = tokio::join!(
		client.execute(RequestSpec::get("me").cancel_on(token.clone())),
		async {
			tokio::time::sleep(StdDuration::from_millis(5)).await;
			client.execute(RequestSpec::get("me/feed")).await
		},
		async {
			tokio::time::sleep(StdDuration::from_millis(10)).await;
			token.cancel();
		},
	);

	assert!(matches!(first, Err(Error::Cancelled)));

	let second = second.expect("Waiter should still get the refreshed credential.");

	assert_eq!(second.outcome(), Outcome::Success);
	assert_eq!(exchange.calls(), 1);
	assert_eq!(
		store.snapshot().expect("Store should hold the refreshed credential.").access_token().expose(),
		"fresh"
	);
}

#[tokio::test(start_paused = true)]
async fn refresh_resend_does_not_consume_a_retry() {
	let build = |transport: &ScriptedTransport, exchange: &CountingExchange| {
		Client::builder()
			.base_url("https://api.example.com/v1")
			.session(session_with("stale"))
			.retry_policy(RetryPolicyConfig::linear(1, StdDuration::from_millis(10)))
			.transport(transport.clone())
			.store(MemoryStore::default())
			.refresh_exchange(exchange.clone())
			.build()
	};
	let transport =
		ScriptedTransport::with_fallback([Reply::status(401), Reply::status(503)], accepts_only("fresh"));
	let exchange = CountingExchange::new(StdDuration::ZERO, rotate_to_fresh);
	let client = build(&transport, &exchange).await.expect("Client should build.");
	let result = client.execute(RequestSpec::get("me")).await.expect("Request should produce a result.");
	let requests = transport.requests();

	// 401, refreshed resend answered 503, then the single retry.
	assert_eq!(transport.calls(), 3);
	assert!(result.ok);
	assert!(!result.retries_exhausted);
	assert_eq!(exchange.calls(), 1);
	assert_eq!(authorization(&requests[1]).as_deref(), Some("Bearer fresh"));
	assert_eq!(authorization(&requests[2]).as_deref(), Some("Bearer fresh"));

	let transport = ScriptedTransport::with_fallback(
		[Reply::status(401), Reply::status(503), Reply::status(503)],
		accepts_only("fresh"),
	);
	let exchange = CountingExchange::new(StdDuration::ZERO, rotate_to_fresh);
	let client = build(&transport, &exchange).await.expect("Client should build.");
	let result = client.execute(RequestSpec::get("me")).await.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 3);
	assert_eq!(result.status_code, Some(503));
	assert!(result.retries_exhausted);
}

#[tokio::test]
async fn second_401_after_refresh_is_terminal() {
	let transport = ScriptedTransport::responding(|_| Reply::status(401));
	let store = MemoryStore::default();
	let exchange = CountingExchange::new(StdDuration::ZERO, rotate_to_fresh);
	let client = client(&transport, &store, &exchange).await;
	let result = client.execute(RequestSpec::get("me")).await.expect("Request should produce a result.");

	assert_eq!(result.auth_failure, Some(AuthFailure::Rejected));
	assert_eq!(result.outcome(), Outcome::AuthenticationExpired);
	assert_eq!(exchange.calls(), 1);
	assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn unauthenticated_401_is_an_http_failure() {
	let transport = ScriptedTransport::new([Reply::status(401)]);
	let client = Client::builder()
		.base_url("https://api.example.com")
		.transport(transport.clone())
		.build()
		.await
		.expect("Client should build.");
	let result = client.execute(RequestSpec::get("public")).await.expect("Request should produce a result.");

	assert!(!client.is_authenticated());
	assert_eq!(result.outcome(), Outcome::Http);
	assert_eq!(result.auth_failure, None);
	assert_eq!(authorization(&transport.requests()[0]), None);
}

#[tokio::test]
async fn stored_credential_is_used_when_retrieval_is_enabled() {
	let transport = ScriptedTransport::responding(accepts_only("fresh"));
	let store = MemoryStore::with_credential(credential("fresh", OffsetDateTime::now_utc()));
	let client = Client::builder()
		.base_url("https://api.example.com")
		.session(SessionConfiguration { should_retrieve_token: true, ..Default::default() })
		.transport(transport.clone())
		.store(store.clone())
		.refresh_exchange(CountingExchange::new(StdDuration::ZERO, revoke))
		.build()
		.await
		.expect("Client should build.");
	let result = client.execute(RequestSpec::get("me")).await.expect("Request should produce a result.");

	assert!(client.is_authenticated());
	assert!(result.ok);
	assert_eq!(
		client.store().load().await.expect("Store should load.").map(|c| c.subject_id().to_owned()),
		Some("42".to_owned())
	);
}

#[tokio::test]
async fn credentials_without_a_refresh_path_are_rejected() {
	let err = Client::builder()
		.session(session_with("stale"))
		.transport(ScriptedTransport::new([]))
		.build()
		.await
		.expect_err("Client should require a refresh exchange.");

	assert!(matches!(err, Error::Config(ConfigError::MissingAuthConfiguration)));

	let err = Client::builder()
		.session(SessionConfiguration {
			api_token: Some(r#"{"refresh_token":"r"}"#.into()),
			..Default::default()
		})
		.transport(ScriptedTransport::new([]))
		.refresh_exchange(CountingExchange::new(StdDuration::ZERO, revoke))
		.build()
		.await
		.expect_err("Client should reject an incomplete api token.");

	assert!(matches!(err, Error::Config(ConfigError::InvalidApiToken(_))));
}
