// src/admin/handler.rs
use crate::events::{EventHub, RoutingEvent};
use crate::load_balancer::{LoadBalancer, RoutingError};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower::Service;
use tracing::{debug, info, warn};

/// Administrative API: activate/deactivate backends, inspect routing state
/// and stream routing events.
#[derive(Clone)]
pub struct AdminHandler {
    load_balancer: Arc<LoadBalancer>,
    hub: EventHub,
    peer: Option<SocketAddr>,
}

impl AdminHandler {
    pub fn new(load_balancer: Arc<LoadBalancer>, hub: EventHub) -> Self {
        Self {
            load_balancer,
            hub,
            peer: None,
        }
    }

    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            ..self.clone()
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        match (req.uri().path(), method) {
            ("/activate", Method::POST) => self.activate(&req),
            ("/deactivate", Method::POST) => self.deactivate(&req),
            ("/backends", Method::GET) => self.backends(),
            ("/table", Method::GET) => self.table(),
            ("/events", Method::GET) => self.events(),
            ("/activate" | "/deactivate" | "/backends" | "/table" | "/events", _) => {
                text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn activate(&self, req: &Request<Body>) -> Response<Body> {
        let Some(id) = query_id(req) else {
            return text(StatusCode::BAD_REQUEST, "Missing 'id' query parameter");
        };

        match self.load_balancer.activate(&id) {
            Ok(()) => {
                info!(backend = %id, peer = ?self.peer, "activated backend");
                text(StatusCode::OK, format!("Activated backend {}.", id))
            }
            Err(e) => {
                warn!(backend = %id, %e, "activation refused");
                error_response(e)
            }
        }
    }

    fn deactivate(&self, req: &Request<Body>) -> Response<Body> {
        let Some(id) = query_id(req) else {
            return text(StatusCode::BAD_REQUEST, "Missing 'id' query parameter");
        };

        match self.load_balancer.deactivate(&id) {
            Ok(()) => {
                info!(backend = %id, peer = ?self.peer, "deactivated backend");
                text(StatusCode::OK, format!("Deactivated backend {}.", id))
            }
            Err(e) => {
                warn!(backend = %id, %e, "deactivation refused");
                error_response(e)
            }
        }
    }

    fn backends(&self) -> Response<Body> {
        let backends: Vec<_> = self
            .load_balancer
            .backends()
            .into_iter()
            .map(|(backend, state)| {
                json!({
                    "id": backend.id,
                    "address": backend.address,
                    "state": state,
                })
            })
            .collect();

        json_response(
            StatusCode::OK,
            json!({
                "active": self.load_balancer.active_backend_ids(),
                "backends": backends,
            }),
        )
    }

    fn table(&self) -> Response<Body> {
        let table = self.load_balancer.table_snapshot();
        json_response(
            StatusCode::OK,
            json!({
                "size": table.size(),
                "configured_size": self.load_balancer.table_size(),
                "slots": table.slot_counts(),
            }),
        )
    }

    /// NDJSON stream: the current active set, then live events.
    fn events(&self) -> Response<Body> {
        // Subscribe before taking the snapshot so no change falls in between.
        let mut rx = self.hub.subscribe();
        let initial = RoutingEvent::active_set(self.load_balancer.active_backend_ids());
        let (mut sender, body) = Body::channel();
        let peer = self.peer;

        tokio::spawn(async move {
            if sender.send_data(initial.to_line().into()).await.is_err() {
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if sender.send_data(event.to_line().into()).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(?peer, skipped, "event subscriber lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(?peer, "event subscriber disconnected");
        });

        let mut response = Response::new(body);
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        );
        response
    }
}

impl Service<Request<Body>> for AdminHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

fn query_id(req: &Request<Body>) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

fn status_for(err: &RoutingError) -> StatusCode {
    match err {
        RoutingError::AlreadyActive(_) => StatusCode::CONFLICT,
        RoutingError::UnknownBackend(_) | RoutingError::NotActive(_) => StatusCode::NOT_FOUND,
        RoutingError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RoutingError::Table(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: RoutingError) -> Response<Body> {
    text(status_for(&err), err.to_string())
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
