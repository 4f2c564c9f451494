// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::proxy::Proxy;

/// Per-connection service that hands requests to the proxy. Proxy errors
/// become error responses here; the connection stays open.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
    peer: SocketAddr,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>, peer: SocketAddr) -> Self {
        Self { proxy, peer }
    }
}

impl Service<Request<Body>> for RequestHandler {
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
        let proxy = self.proxy.clone();
        let peer = self.peer;
        Box::pin(async move {
            match proxy.handle(req, peer).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    if e.status().is_server_error() && e.backend().is_some() {
                        tracing::error!(%peer, %e, "proxy error");
                    } else {
                        tracing::warn!(%peer, %e, "request not routed");
                    }
                    Ok(e.into())
                }
            }
        })
    }
}
