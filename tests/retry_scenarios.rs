use quiver::{Client, ClientConfig, Error};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(uris: Vec<String>) -> ClientConfig {
    serde_json::from_value(serde_json::json!({
        "service-name": "scenario",
        "uris": uris,
        "initial-backoff": "10ms",
        "max-backoff": "50ms"
    }))
    .expect("valid config")
}

#[tokio::test]
async fn succeeds_on_third_attempt_after_two_503s() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::new(config(vec![server.uri()])).unwrap();
    let response = client.get("/items").max_attempts(5).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.attempts(), 3);
}

#[tokio::test]
async fn failing_hosts_are_routed_around() {
    let bad_a = MockServer::start().await;
    let bad_b = MockServer::start().await;
    let good = MockServer::start().await;
    for server in [&bad_a, &bad_b] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&good)
        .await;

    let client = Client::new(config(vec![bad_a.uri(), bad_b.uri(), good.uri()])).unwrap();
    let response = client.get("/items").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    // One attempt per distinct host at most: failures push scores up.
    assert!(response.attempts() <= 3, "took {} attempts", response.attempts());
}

#[tokio::test]
async fn throttle_with_retry_after_sleeps_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::new(config(vec![server.uri()])).unwrap();
    let started = Instant::now();
    let response = client.get("/items").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.attempts(), 2, "exactly one retry");
    assert!(started.elapsed() >= Duration::from_secs(1), "Retry-After was honored");
}

#[tokio::test]
async fn permanent_redirect_is_followed_to_the_other_host() {
    let server_b = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server_b)
        .await;

    let server_a = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Location", format!("{}/x", server_b.uri())),
        )
        .mount(&server_a)
        .await;

    let client = Client::new(config(vec![server_a.uri()])).unwrap();
    let response = client.get("/start").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.attempts(), 2);
    let expected_host = url::Url::parse(&server_b.uri()).unwrap();
    assert_eq!(response.url().host_str(), expected_host.host_str());
    assert_eq!(response.url().port(), expected_host.port());
    assert_eq!(response.url().path(), "/x");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(config(vec![server.uri()])).unwrap();
    let error = client.get("/missing").send().await.unwrap_err();
    assert_eq!(error.status_code(), Some(404));
}

#[tokio::test]
async fn retry_budget_defaults_to_twice_the_pool_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = Client::new(config(vec![server.uri()])).unwrap();
    let error = client.get("/items").send().await.unwrap_err();
    assert_eq!(error.status_code(), Some(503), "last failure surfaces");
}

#[tokio::test]
async fn explicit_attempt_cap_is_respected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let client = Client::new(config(vec![server.uri()])).unwrap();
    let error = client.get("/items").max_attempts(4).send().await.unwrap_err();
    assert_eq!(error.status_code(), Some(503));
}

#[tokio::test]
async fn call_deadline_cancels_the_retry_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut cfg = config(vec![server.uri()]);
    cfg.initial_backoff = Some(Duration::from_secs(5));
    cfg.max_backoff = Some(Duration::from_secs(5));
    let client = Client::new(cfg).unwrap();

    let started = Instant::now();
    let error = client
        .get("/items")
        .max_attempts(0)
        .deadline(Duration::from_millis(300))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Cancelled), "got {error:?}");
    assert!(started.elapsed() < Duration::from_secs(3), "deadline interrupted the backoff");
}
