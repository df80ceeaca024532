// Krypton - HTTP server module
// Chat, speech, and metrics endpoints over the route table

mod handlers;

pub use handlers::{create_router, health_check, metrics_endpoint, AppError, BadRequest, ChatRequest, ChatResponse};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::router::Router;
use crate::speech::SpeechService;

/// Main agent server structure
pub struct AgentServer {
    /// Route table shared by every request
    router: Router,
    speech: SpeechService,
    config: ServerConfig,
    started: Instant,
}

impl AgentServer {
    pub fn new(router: Router, speech: SpeechService, config: ServerConfig) -> Self {
        Self {
            router,
            speech,
            config,
            started: Instant::now(),
        }
    }

    /// Build the axum app with tracing (and CORS when enabled)
    pub fn into_app(self) -> axum::Router {
        let allow_cors = self.config.allow_cors;
        let app = create_router(Arc::new(self)).layer(TraceLayer::new_for_http());
        if allow_cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Start the HTTP server; returns once ctrl-c has drained in-flight requests
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.bind.clone();
        let app = self.into_app();

        tracing::info!("Starting Krypton server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        tracing::info!("Server stopped");
        Ok(())
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn speech(&self) -> &SpeechService {
        &self.speech
    }

    /// Get server configuration
    pub fn settings(&self) -> &ServerConfig {
        &self.config
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
