// tests/proxy_tests.rs
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode};
use maglev_lb::admin::AdminHandler;
use maglev_lb::config::{
    BackendConfig, Config, HashKey, MetricsConfig, ProxyConfig, RoutingConfig,
};
use maglev_lb::events::EventHub;
use maglev_lb::load_balancer::LoadBalancer;
use maglev_lb::proxy::{Proxy, BACKEND_ID_HEADER, REQUEST_ID_HEADER};
use maglev_lb::server::{RequestHandler, ServerBuilder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn config(backends: &[(&str, String)], active: &[&str], hash_key: HashKey) -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        admin_listen: "127.0.0.1:0".parse().unwrap(),
        routing: RoutingConfig {
            table_size: 1031,
            hash_key,
            hash_header: Some("x-session-id".into()),
        },
        backends: backends
            .iter()
            .map(|(id, address)| BackendConfig {
                id: id.to_string(),
                address: address.clone(),
            })
            .collect(),
        active: active.iter().map(|s| s.to_string()).collect(),
        proxy: ProxyConfig { timeout_secs: 5 },
        metrics: MetricsConfig::default(),
    }
}

async fn start_proxy(config: &Config, lb: Arc<LoadBalancer>) -> SocketAddr {
    let proxy = Arc::new(Proxy::new(config, lb, None));
    let server = ServerBuilder::new(config.listen)
        .with_handler(move |peer| RequestHandler::new(proxy.clone(), peer))
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve_with_shutdown(std::future::pending()));
    addr
}

async fn body_string(body: Body) -> String {
    let bytes = hyper::body::to_bytes(body).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_forwards_to_resolved_backend() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/hello")
        .match_header(REQUEST_ID_HEADER, mockito::Matcher::Any)
        .match_header("x-forwarded-for", "127.0.0.1")
        .with_status(200)
        .with_body("Hello from a")
        .create_async()
        .await;

    let config = config(&[("a", upstream.host_with_port())], &["a"], HashKey::ClientIp);
    let lb = Arc::new(LoadBalancer::from_config(&config).unwrap());
    let addr = start_proxy(&config, lb.clone()).await;

    let client = Client::new();
    let response = client
        .get(format!("http://{}/hello", addr).parse().unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[BACKEND_ID_HEADER], "a");
    assert_eq!(body_string(response.into_body()).await, "Hello from a");
    mock.assert_async().await;

    lb.deactivate("a").unwrap();
    let response = client
        .get(format!("http://{}/hello", addr).parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_header_key_pins_session() {
    let mut first = mockito::Server::new_async().await;
    let mut second = mockito::Server::new_async().await;
    first
        .mock("GET", "/")
        .with_body("first")
        .create_async()
        .await;
    second
        .mock("GET", "/")
        .with_body("second")
        .create_async()
        .await;

    let config = config(
        &[("a", first.host_with_port()), ("b", second.host_with_port())],
        &["a", "b"],
        HashKey::Header,
    );
    let lb = Arc::new(LoadBalancer::from_config(&config).unwrap());
    let addr = start_proxy(&config, lb.clone()).await;
    let client = Client::new();

    for session in ["alice", "bob", "carol", "dave"] {
        let expected = lb.resolve(session.as_bytes()).unwrap().id.clone();
        for _ in 0..3 {
            let request = Request::get(format!("http://{}/", addr))
                .header("x-session-id", session)
                .body(Body::empty())
                .unwrap();
            let response = client.request(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[BACKEND_ID_HEADER], expected.as_str());
        }
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    // Bind and drop a listener to get a port nothing is serving.
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = closed.local_addr().unwrap().to_string();
    drop(closed);

    let config = config(&[("dead", dead)], &["dead"], HashKey::ClientIp);
    let lb = Arc::new(LoadBalancer::from_config(&config).unwrap());
    let addr = start_proxy(&config, lb).await;

    let response = Client::new()
        .get(format!("http://{}/", addr).parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_admin_activation_over_http() {
    let config = config(
        &[
            ("a", "localhost:1".to_string()),
            ("b", "localhost:2".to_string()),
        ],
        &["a"],
        HashKey::ClientIp,
    );
    let hub = EventHub::default();
    let lb = Arc::new(
        LoadBalancer::from_config(&config)
            .unwrap()
            .with_observer(Arc::new(hub.clone())),
    );
    let admin = AdminHandler::new(lb.clone(), hub);
    let server = ServerBuilder::new(config.admin_listen)
        .with_handler(move |peer| admin.for_peer(peer))
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let client = Client::new();
    let activate = Request::post(format!("http://{}/activate?id=b", addr))
        .body(Body::empty())
        .unwrap();
    let response = client.request(activate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(lb.active_backend_ids(), vec!["a", "b"]);

    let response = client
        .get(format!("http://{}/backends", addr).parse().unwrap())
        .await
        .unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(value["active"], serde_json::json!(["a", "b"]));

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_request_finish() {
    let slow = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_service_fn(|_| async {
        Ok::<_, Infallible>(service_fn(|_req| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<_, Infallible>(Response::new(Body::from("slow")))
        }))
    }));
    let upstream = slow.local_addr().to_string();
    tokio::spawn(slow);

    let config = config(&[("slow", upstream)], &["slow"], HashKey::ClientIp);
    let lb = Arc::new(LoadBalancer::from_config(&config).unwrap());
    let proxy = Arc::new(Proxy::new(&config, lb, None));
    let server = ServerBuilder::new(config.listen)
        .with_handler(move |peer| RequestHandler::new(proxy.clone(), peer))
        .with_drain_timeout(Duration::from_secs(5))
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let request = tokio::spawn(async move {
        let response = Client::new()
            .get(format!("http://{}/", addr).parse().unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, body_string(response.into_body()).await)
    });

    // Shut down while the upstream is still sleeping on the request.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();

    let (status, body) = request.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "slow");

    // No new connections once the server has returned.
    let refused = Client::new()
        .get(format!("http://{}/", addr).parse().unwrap())
        .await;
    assert!(refused.is_err());
}
