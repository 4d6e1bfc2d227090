use quiver::{Client, ClientConfig, Refreshable};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(json: serde_json::Value) -> ClientConfig {
    serde_json::from_value(json).expect("valid config")
}

#[tokio::test]
async fn read_timeout_change_applies_without_rebuilding_the_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    // write-timeout is pinned low so the attempt budget max(read, write)
    // tracks the read-timeout alone.
    let live = Refreshable::new(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()],
        "read-timeout": "60s",
        "write-timeout": "1ms",
        "max-num-retries": 0
    })));
    let client = Client::from_refreshable(live.clone()).unwrap();
    let transport_before = client.transport_handle();

    let response = client.get("/slow").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200, "60s budget tolerates the 300ms delay");

    live.set(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()],
        "read-timeout": "50ms",
        "write-timeout": "1ms",
        "max-num-retries": 0
    })))
    .unwrap();

    assert_eq!(
        client.transport_handle(),
        transport_before,
        "timeout-only change must not rebuild the connection pool"
    );

    let error = client.get("/slow").send().await.unwrap_err();
    assert!(error.is_transport(), "50ms budget times out: {error:?}");
}

#[tokio::test]
async fn transport_parameter_change_rebuilds_the_pool() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let live = Refreshable::new(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()]
    })));
    let client = Client::from_refreshable(live.clone()).unwrap();
    let transport_before = client.transport_handle();

    live.set(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()],
        "max-idle-conns-per-host": 3
    })))
    .unwrap();

    assert_ne!(client.transport_handle(), transport_before);
    client.get("/ok").send().await.unwrap();
}

#[tokio::test]
async fn uri_pool_updates_apply_to_new_calls() {
    let old = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&old)
        .await;
    let new = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&new)
        .await;

    let live = Refreshable::new(config(serde_json::json!({
        "service-name": "live",
        "uris": [old.uri()]
    })));
    let client = Client::from_refreshable(live.clone()).unwrap();
    client.get("/a").send().await.unwrap();

    live.set(config(serde_json::json!({
        "service-name": "live",
        "uris": [new.uri()]
    })))
    .unwrap();
    let response = client.get("/b").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn late_token_starts_applying_without_a_rebuild() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::header("Authorization", "Bearer appeared-later"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let live = Refreshable::new(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()]
    })));
    let client = Client::from_refreshable(live.clone()).unwrap();
    let unauthorized = client.get("/secure").send().await.unwrap_err();
    assert_eq!(unauthorized.status_code(), Some(401));

    live.set(config(serde_json::json!({
        "service-name": "live",
        "uris": [server.uri()],
        "api-token": "appeared-later"
    })))
    .unwrap();
    let response = client.get("/secure").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
