use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use geoexports_db_postgres::{PgMetadataStore, PgQueryBackend, create_pool};
use geoexports_notifications::{
    DynNotificationSender, EmailNotificationSender, LogNotificationSender,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers, middleware as app_middleware, state::AppState};

pub struct GeoExportsServer {
    addr: SocketAddr,
    base_url: String,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::list_exports))
        .route("/api/{id_export}", get(handlers::read_export))
        .route("/{id_export}/{format}", post(handlers::create_export))
        .route("/swagger-resources/", get(handlers::swagger_root))
        .route("/swagger-resources/{id_export}", get(handlers::swagger_export))
        // Historical spelling, still linked from deployed UIs
        .route("/swagger-ressources/", get(handlers::swagger_root))
        .route("/swagger-ressources/{id_export}", get(handlers::swagger_export))
        .with_state(state)
        // Layers run outside-in from the bottom: body limit, request id, trace, compression, cors
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Email sender when a provider is configured, log sender otherwise.
pub fn notification_sender(config: &AppConfig) -> anyhow::Result<DynNotificationSender> {
    match config.notifications.provider() {
        Some(provider) => {
            tracing::info!(provider, "email notifications enabled");
            Ok(Arc::new(EmailNotificationSender::from_config(
                config.notifications.clone(),
            )?))
        }
        None => {
            tracing::warn!("no email provider configured, export outcomes will only be logged");
            Ok(Arc::new(LogNotificationSender::new()))
        }
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Connect to PostgreSQL and assemble the application.
    pub async fn build(self) -> anyhow::Result<GeoExportsServer> {
        let pg_config = self.config.storage.postgres.backend_config();
        let pool = create_pool(&pg_config).await?;
        let metadata = Arc::new(PgMetadataStore::new(pool.clone(), &pg_config)?);
        let backend = Arc::new(PgQueryBackend::new(pool));
        let sender = notification_sender(&self.config)?;

        let base_url = self.config.base_url();
        let state = AppState::new(self.config, metadata, backend, sender);
        Ok(GeoExportsServer {
            addr: self.addr,
            base_url,
            app: build_app(state),
        })
    }
}

impl GeoExportsServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, base_url = %self.base_url, "listening");
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
