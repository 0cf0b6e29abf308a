mod common;

// std
use std::time::Duration as StdDuration;
// crates.io
use bearer_client::{
	client::{Client, RequestSpec},
	oauth2::http::Method,
	response::Outcome,
	retry::RetryPolicyConfig,
};
use tokio::time::Instant;
// self
use common::*;

async fn client(transport: &ScriptedTransport, policy: RetryPolicyConfig) -> Client {
	Client::builder()
		.base_url("https://api.example.com")
		.retry_policy(policy)
		.transport(transport.clone())
		.build()
		.await
		.expect("Client should build.")
}

#[tokio::test(start_paused = true)]
async fn linear_policy_retries_at_a_fixed_interval_until_exhausted() {
	let transport = ScriptedTransport::responding(|_| Reply::status(503));
	let client = client(&transport, RetryPolicyConfig::linear(3, StdDuration::from_millis(100))).await;
	let started = Instant::now();
	let result = client.execute(RequestSpec::get("items")).await.expect("Request should produce a result.");
	let elapsed = started.elapsed();

	assert_eq!(transport.calls(), 4);
	assert!(result.retries_exhausted);
	assert_eq!(result.status_code, Some(503));
	assert_eq!(result.outcome(), Outcome::Http);
	assert!(elapsed >= StdDuration::from_millis(300), "elapsed {elapsed:?}");
	assert!(elapsed < StdDuration::from_millis(400), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn exponential_policy_doubles_each_delay() {
	let transport = ScriptedTransport::responding(|_| Reply::status(502));
	let client =
		client(&transport, RetryPolicyConfig::exponential(3, 2., StdDuration::from_millis(100))).await;
	let started = Instant::now();
	let result = client.execute(RequestSpec::get("items")).await.expect("Request should produce a result.");
	let elapsed = started.elapsed();

	// 100ms + 200ms + 400ms.
	assert_eq!(transport.calls(), 4);
	assert!(result.retries_exhausted);
	assert!(elapsed >= StdDuration::from_millis(700), "elapsed {elapsed:?}");
	assert!(elapsed < StdDuration::from_millis(800), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn methods_outside_the_policy_are_not_retried() {
	let transport = ScriptedTransport::responding(|_| Reply::status(503));
	let policy =
		RetryPolicyConfig::linear(3, StdDuration::from_millis(100)).with_methods(["GET", "PUT"]);
	let client = client(&transport, policy).await;
	let result = client
		.execute(RequestSpec::new(Method::DELETE, "items/1"))
		.await
		.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 1);
	assert!(!result.retries_exhausted);
	assert_eq!(result.status_code, Some(503));
}

#[tokio::test(start_paused = true)]
async fn statuses_outside_the_policy_are_not_retried() {
	let transport = ScriptedTransport::responding(|_| Reply::status(404));
	let client = client(&transport, RetryPolicyConfig::linear(3, StdDuration::from_millis(100))).await;
	let result = client.execute(RequestSpec::get("missing")).await.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 1);
	assert!(!result.retries_exhausted);
	assert_eq!(result.outcome(), Outcome::Http);
}

#[tokio::test(start_paused = true)]
async fn per_request_policy_applies_to_its_own_method() {
	let transport = ScriptedTransport::responding(|_| Reply::status(500));
	let client = client(&transport, RetryPolicyConfig::linear(0, StdDuration::ZERO)).await;
	let spec = RequestSpec::post("orders")
		.json(serde_json::json!({ "sku": "a-1" }))
		.retry_policy(RetryPolicyConfig::linear(2, StdDuration::from_millis(10)));
	let result = client.execute(spec).await.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 3);
	assert!(result.retries_exhausted);

	for request in transport.requests() {
		assert_eq!(request.method, Method::POST);
		assert_eq!(request.body.as_deref(), Some(&br#"{"sku":"a-1"}"#[..]));
	}
}

#[tokio::test(start_paused = true)]
async fn transport_failures_are_retried_until_success() {
	let transport = ScriptedTransport::new([Reply::Fail, Reply::Fail]);
	let client = client(&transport, RetryPolicyConfig::linear(2, StdDuration::from_millis(100))).await;
	let result = client.execute(RequestSpec::get("items")).await.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 3);
	assert!(result.ok);
	assert!(!result.retries_exhausted);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_failures_report_the_error() {
	let transport = ScriptedTransport::responding(|_| Reply::Fail);
	let client = client(&transport, RetryPolicyConfig::linear(1, StdDuration::from_millis(100))).await;
	let result = client.execute(RequestSpec::get("items")).await.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 2);
	assert_eq!(result.outcome(), Outcome::Transport);
	assert!(result.retries_exhausted);
	assert_eq!(result.status_code, None);
	assert!(
		result.transport_error.as_deref().is_some_and(|message| message.contains("connection reset"))
	);
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_count_as_transport_failures() {
	let transport = ScriptedTransport::new([Reply::Hang]);
	let api = client(&transport, RetryPolicyConfig::linear(1, StdDuration::from_millis(10))).await;
	let result = api
		.execute(RequestSpec::get("slow").timeout(StdDuration::from_millis(50)))
		.await
		.expect("Request should produce a result.");

	assert_eq!(transport.calls(), 2);
	assert!(result.ok);

	let transport = ScriptedTransport::responding(|_| Reply::Hang);
	let api = client(&transport, RetryPolicyConfig::linear(0, StdDuration::ZERO)).await;
	let result = api
		.execute(RequestSpec::get("slow").timeout(StdDuration::from_millis(50)))
		.await
		.expect("Request should produce a result.");

	assert_eq!(result.outcome(), Outcome::Transport);
	assert!(result.transport_error.as_deref().is_some_and(|message| message.contains("timed out")));
}
