use crate::api::{
    email::{EmailSender, EmailWorkerConfig},
    handlers::{
        auth::{self, AuthState},
        health, root,
    },
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Listener, pool and background task settings for [`new`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    port: u16,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown_timeout: Duration,
    max_connections: u32,
    token_prune_interval: Duration,
}

impl ServerConfig {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 10,
            token_prune_interval: Duration::from_secs(3600),
        }
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Zero disables the expired token pruner.
    #[must_use]
    pub fn with_token_prune_interval(mut self, interval: Duration) -> Self {
        self.token_prune_interval = interval;
        self
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// Assemble the HTTP application around an existing pool.
///
/// # Errors
/// Returns an error if the configured frontend base URL has no usable origin.
pub fn app(pool: PgPool, auth_state: Arc<AuthState>, config: &ServerConfig) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // `/` and the preflight-only `OPTIONS /health` stay out of the OpenAPI document.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(TimeoutLayer::new(config.write_timeout))
                .layer(RequestBodyTimeoutLayer::new(config.read_timeout))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    Ok(app)
}

/// Start the server and run until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if the database is unreachable, the port cannot be bound,
/// or the server fails while serving.
pub async fn new(
    config: ServerConfig,
    dsn: SecretString,
    auth_state: Arc<AuthState>,
    sender: Arc<dyn EmailSender>,
    email_config: EmailWorkerConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    // Background worker polls email_outbox for pending rows, delivers them,
    // and retries failures with exponential backoff.
    let outbox = email::spawn_outbox_worker(pool.clone(), sender, email_config);
    let pruner = auth::spawn_token_pruner(pool.clone(), config.token_prune_interval);

    let app = app(pool.clone(), auth_state, &config)?;

    let listener = TcpListener::bind(format!("::0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    info!("Listening on [::]:{}", config.port);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let serve = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
        // Err means the sender is gone, which also means shut down.
        let _ = shutdown_rx.changed().await;
    });
    let mut server = tokio::spawn(async move { serve.await });

    let result = tokio::select! {
        joined = &mut server => joined
            .context("server task panicked")
            .and_then(|served| served.context("server error")),
        () = shutdown_signal() => {
            info!("Gracefully shutdown");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
                Ok(joined) => joined
                    .context("server task panicked")
                    .and_then(|served| served.context("server error")),
                Err(_) => {
                    warn!(
                        timeout = ?config.shutdown_timeout,
                        "in-flight requests did not finish in time, aborting"
                    );
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    outbox.abort();
    if let Some(pruner) = pruner {
        pruner.abort();
    }
    pool.close().await;

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
