// src/main.rs
use anyhow::Result;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use maglev_lb::{
    admin::AdminHandler,
    config::{self, Config},
    events::EventHub,
    load_balancer::LoadBalancer,
    metrics::MetricsRegistry,
    proxy::Proxy,
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("maglev_lb=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    // Build the routing core
    let hub = EventHub::default();
    let load_balancer = Arc::new(
        LoadBalancer::from_config(&config)?
            .with_observer(Arc::new(hub.clone()))
            .with_observer(metrics.clone()),
    );
    metrics.set_backend_counts(config.active.len(), config.backends.len());
    info!(
        table_size = config.routing.table_size,
        active = ?load_balancer.active_backend_ids(),
        "Built the initial Maglev lookup table"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(
            metrics_addr,
            metrics_registry,
            config.metrics.path.clone(),
            wait_for(shutdown_rx.clone()),
        )?;
    }

    start_admin_server(&config, load_balancer.clone(), hub, wait_for(shutdown_rx)).await?;

    // Create proxy
    let proxy = Arc::new(Proxy::new(&config, load_balancer, Some(metrics)));

    // Start main server
    info!("Starting load balancer on {}", config.listen);
    ServerBuilder::new(config.listen)
        .with_handler(move |peer| RequestHandler::new(proxy.clone(), peer))
        .with_drain_timeout(config.proxy.timeout())
        .bind()
        .await?
        .serve_with_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    info!("Load balancer stopped");
    Ok(())
}

async fn start_admin_server(
    config: &Config,
    load_balancer: Arc<LoadBalancer>,
    hub: EventHub,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let admin = AdminHandler::new(load_balancer, hub);
    let server = ServerBuilder::new(config.admin_listen)
        .with_handler(move |peer| admin.for_peer(peer))
        .bind()
        .await?;

    info!("Admin API listening on http://{}", server.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = server.serve_with_shutdown(shutdown).await {
            error!("Admin server error: {}", e);
        }
    });
    Ok(())
}

fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path); // keep this for logging
    let service_path = metrics_path.clone(); // clone for the service closure

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let response = if req.uri().path() == path.as_str() {
                        let mut response = Response::new(Body::from(registry.gather()));
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        response
                    } else {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)?
        .serve(make_service)
        .with_graceful_shutdown(shutdown);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
