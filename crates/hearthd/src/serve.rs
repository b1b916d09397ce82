//! Gateway server: shared state, router assembly, health and auth
//! callback endpoints, startup and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use hearthconf::HearthConfig;
use hearthlink::{BackendLink, LinkConfig};
use hearthproto::ToolSpec;

use crate::auth::AuthGate;
use crate::session::SessionRegistry;
use crate::tools::{BackendExecutor, ToolExecutor};

/// Shared state behind every handler.
pub struct GatewayState {
    pub sessions: SessionRegistry,
    pub auth: AuthGate,
    pub executor: Arc<dyn ToolExecutor>,
    pub catalog: Vec<ToolSpec>,
    pub keepalive: Duration,
    pub link: Option<Arc<BackendLink>>,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(
        capacity: usize,
        keepalive: Duration,
        auth: AuthGate,
        executor: Arc<dyn ToolExecutor>,
        catalog: Vec<ToolSpec>,
        link: Option<Arc<BackendLink>>,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(capacity),
            auth,
            executor,
            catalog,
            keepalive,
            link,
            start_time: Instant::now(),
        }
    }
}

/// Assemble the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/sse", get(crate::sse::sse_handler))
        .route("/message", post(crate::message::message_handler))
        .route("/health", get(handle_health))
        .route("/auth/callback", get(handle_auth_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn handle_health(State(state): State<Arc<GatewayState>>) -> axum::Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    let backend = state
        .link
        .as_ref()
        .map(|link| link.state().to_string())
        .unwrap_or_else(|| "unconfigured".to_string());

    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.as_secs(),
        "connections": state.sessions.len(),
        "backend": backend,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// OAuth callback: exchange the code, cache the token.
pub async fn handle_auth_callback(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let (Some(code), Some(auth_state)) = (params.code, params.state) else {
        return (StatusCode::BAD_REQUEST, "Missing code or state").into_response();
    };

    match state.auth.exchange_code(&code, &auth_state) {
        Some(_token) => Html(
            "Authentication successful! Return to your client and your \
             connection will be established.",
        )
        .into_response(),
        None => (StatusCode::UNAUTHORIZED, "Authentication failed").into_response(),
    }
}

/// Run the gateway.
pub async fn run(config: HearthConfig) -> Result<()> {
    info!("Hearth MCP gateway starting");
    info!("   Bind: {}:{}", config.server.host, config.server.port);
    info!("   Capacity: {} sessions", config.server.max_connections);

    let link = match config.backend.access_token {
        Some(ref token) => {
            let ws_url = config.backend.websocket_url();
            info!("   Backend: {}", ws_url);
            let link_config = LinkConfig::new(&ws_url, token)
                .with_command_timeout(Duration::from_secs(config.backend.command_timeout_secs));
            Some(BackendLink::spawn(link_config))
        }
        None => {
            tracing::warn!("   No backend access token; tool calls will fail until configured");
            None
        }
    };

    let bind_host = if config.server.host == "0.0.0.0" {
        "localhost".to_string()
    } else {
        config.server.host.clone()
    };
    let auth = AuthGate::new(
        config.backend.url.trim_end_matches('/'),
        format!("http://{}:{}/auth/callback", bind_host, config.server.port),
    );

    let link_handle = link.clone();
    let state = Arc::new(GatewayState::new(
        config.server.max_connections,
        Duration::from_secs(config.server.keepalive_secs),
        auth,
        Arc::new(BackendExecutor::new(link.clone())),
        crate::tools::catalog(),
        link,
    ));

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    if config.tls.enabled {
        let rustls = crate::tls::load_rustls_config(&config.tls).await?;
        let listener = std::net::TcpListener::bind(&addr)
            .with_context(|| format!("Failed to bind to {addr}"))?;
        info!("Hearth ready (TLS): https://{}", addr);
        serve_tls(listener, rustls, app, shutdown_signal()).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;
        info!("Hearth ready!");
        info!("   SSE: GET http://{}/sse", addr);
        info!("   Messages: POST http://{}/message", addr);
        info!("   Health: GET http://{}/health", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
    }

    if let Some(link) = link_handle {
        link.shutdown();
    }
    info!("Shutdown complete");
    Ok(())
}

/// Serve the app over TLS until `shutdown` resolves, then drain
/// connections. Signal handling stays outside so the trigger can be
/// anything that completes.
pub async fn serve_tls(
    listener: std::net::TcpListener,
    rustls: axum_server::tls_rustls::RustlsConfig,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    listener
        .set_nonblocking(true)
        .context("Failed to set listener non-blocking")?;

    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        signal_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    axum_server::from_tcp_rustls(listener, rustls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
