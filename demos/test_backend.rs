//! demos/test_backend.rs
//! Run: cargo run --example test_backend -- <port> [id]
//!
//! Answers every request with `Hello from <id>`, so the backend a client is
//! pinned to is visible from the response body.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    id: String,
    req_counter: Arc<AtomicU64>,
    base_delay: u64,
    jitter_ms: u64,
    fail_pct: f64,
}

// ——————————————————————————————————————————
// Request handler
async fn handle(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned();
    println!("[{}] request #{} {} from {}", state.id, n, req.uri().path(), forwarded_for);

    // Simulate latency
    let delay = state.base_delay + rand::thread_rng().gen_range(0..=state.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    // Simulate failure
    if state.fail_pct > 0.0 && rand::thread_rng().gen_bool(state.fail_pct / 100.0) {
        let mut response = Response::new(Body::from("Injected failure"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    Ok(Response::new(Body::from(format!("Hello from {}\n", state.id))))
}

// ——————————————————————————————————————————
// Main
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8081".into())
        .parse()?;
    let id = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_ID").ok())
        .unwrap_or_else(|| format!("Backend-{}", port.saturating_sub(8080)));

    let base_delay = std::env::var("BASE_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let jitter_ms = std::env::var("JITTER_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fail_pct = std::env::var("FAIL_PCT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);

    let state = BackendState {
        id: id.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
        base_delay,
        jitter_ms,
        fail_pct,
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    println!(
        "Backend '{}' on http://{}  [delay={}ms±{} fail={}%]",
        id, addr, base_delay, jitter_ms, fail_pct
    );

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
