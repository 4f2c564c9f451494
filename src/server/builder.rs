// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::bind_tcp;
use anyhow::{anyhow, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::Service;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Builder pattern so `main.rs` can inject the proxy or admin handler.
///
/// The handler is built per connection from the peer address, so handlers
/// can key routing decisions on the client.
pub struct ServerBuilder<F> {
    addr: SocketAddr,
    make_handler: Option<F>,
    drain_timeout: Duration,
}

impl<F, H> ServerBuilder<F>
where
    F: Fn(SocketAddr) -> H + Send + 'static,
    H: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            make_handler: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_handler(mut self, make_handler: F) -> Self {
        self.make_handler = Some(make_handler);
        self
    }

    /// How long shutdown waits for open connections before aborting them.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Bind the TCP socket without accepting yet.
    pub async fn bind(self) -> Result<Server<F>> {
        let make_handler = self
            .make_handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;
        let listener = bind_tcp(self.addr).await?;
        Ok(Server {
            listener,
            make_handler,
            drain_timeout: self.drain_timeout,
        })
    }
}

pub struct Server<F> {
    listener: TcpListener,
    make_handler: F,
    drain_timeout: Duration,
}

impl<F, H> Server<F>
where
    F: Fn(SocketAddr) -> H + Send + 'static,
    H: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then let open
    /// connections finish their in-flight requests for up to the drain
    /// timeout. Whatever is still open after that is aborted.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = self.local_addr()?;
        let Server {
            listener,
            make_handler,
            drain_timeout,
        } = self;
        tracing::info!("HTTP server listening on {}", addr);
        tokio::pin!(shutdown);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            let backoff = tokio::select! {
                _ = &mut shutdown => break,
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(%err, "connection task panicked");
                        }
                    }
                    None
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let svc = make_handler(peer);
                        connections.spawn(serve_connection(stream, peer, svc, stop_rx.clone()));
                        None
                    }
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        accept_backoff(&err)
                    }
                },
            };

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        drop(listener);
        tracing::info!(
            open = connections.len(),
            "HTTP server on {} stopped accepting, draining connections",
            addr
        );
        let _ = stop_tx.send(true);

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "drain timeout on {} elapsed, aborting connections",
                addr
            );
            connections.shutdown().await;
        }
        Ok(())
    }
}

/// Delay before the next accept. Errors tied to a single connection are
/// retried at once; anything else (EMFILE, ENFILE, ENOMEM) persists until
/// some connection closes, so wait before polling the listener again.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

async fn serve_connection<H>(
    stream: TcpStream,
    peer: SocketAddr,
    svc: H,
    mut stop: watch::Receiver<bool>,
) where
    H: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    let conn = Http::new().serve_connection(stream, svc);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = stop.changed() => {
            // Finish the request in flight, then close instead of keeping alive.
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(err) = result {
        tracing::warn!(%peer, %err, "connection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhaustion_backs_off() {
        // EMFILE and ENFILE on Linux.
        for code in [24, 23] {
            let err = io::Error::from_raw_os_error(code);
            assert_eq!(accept_backoff(&err), Some(ACCEPT_BACKOFF));
        }
        let err = io::Error::from(io::ErrorKind::OutOfMemory);
        assert_eq!(accept_backoff(&err), Some(ACCEPT_BACKOFF));
    }

    #[test]
    fn test_connection_errors_retry_immediately() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert_eq!(accept_backoff(&io::Error::from(kind)), None);
        }
    }
}
