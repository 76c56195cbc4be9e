//! API server setup and configuration.

use axum::Router;
use axum::extract::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::pipeline::PipelineManager;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum accepted upload size in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            body_limit: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Job store, queue, workers and purge
    pub pipeline_manager: Arc<PipelineManager>,
    /// Upload size cap in bytes
    pub max_upload_bytes: usize,
    /// Logging configuration for dynamic log level changes
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(pipeline_manager: Arc<PipelineManager>, max_upload_bytes: usize) -> Self {
        Self {
            start_time: Instant::now(),
            pipeline_manager,
            max_upload_bytes,
            logging_config: None,
        }
    }

    /// Set the logging configuration.
    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

fn is_health_check(req: &Request) -> bool {
    req.uri().path().starts_with("/health")
}

/// Build the router with all middleware and routes.
pub fn build_router(config: &ApiServerConfig, state: AppState) -> Router {
    let mut router = routes::create_router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if is_health_check(req) {
                    Span::none()
                } else {
                    let mut make_span =
                        tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                    use tower_http::trace::MakeSpan;
                    make_span.make_span(req)
                }
            })
            .on_request(|req: &Request, span: &Span| {
                if span.is_disabled() || is_health_check(req) {
                    return;
                }
                let mut on_request =
                    tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                use tower_http::trace::OnRequest;
                on_request.on_request(req, span);
            })
            .on_response(
                |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let on_response =
                        tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnResponse;
                    on_response.on_response(res, latency, span);
                },
            )
            .on_failure(
                |class: tower_http::classify::ServerErrorsFailureClass,
                 latency: Duration,
                 span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_failure =
                        tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                    use tower_http::trace::OnFailure;
                    on_failure.on_failure(class, latency, span);
                },
            ),
    )
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn router(&self) -> Router {
        build_router(&self.config, self.state.clone())
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid API bind address: {}", e)))?;

        let router = self.router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
