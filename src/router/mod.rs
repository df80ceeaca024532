// Route table
//
// Maps a route name to a backend, the tools its sessions may call, and the
// session settings. Which tools a route exposes is configuration, never code.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::{Message, SessionConfig, SessionOutcome, ToolCallSession};
use crate::config::{Config, RouteSettings};
use crate::errors::{RouterError, SessionError};
use crate::metrics::METRICS;
use crate::providers::{ModelBackend, ProviderRequest, TextStream};
use crate::tools::implementations::builtin_catalog;
use crate::tools::{ToolRegistry, ToolSet};

/// One named route
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub backend: Arc<dyn ModelBackend>,
    pub tools: ToolSet,
    pub session: SessionConfig,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
        tools: ToolSet,
        session: SessionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            tools,
            session,
        }
    }

    /// Fresh session for one user message
    pub fn start_session(&self, message: impl Into<String>) -> ToolCallSession {
        ToolCallSession::new(
            Arc::clone(&self.backend),
            self.tools.clone(),
            self.session.clone(),
            message,
        )
    }

    /// Stream a plain reply, without tools
    pub async fn stream_reply(&self, message: &str) -> Result<TextStream, SessionError> {
        let mut messages = Vec::new();
        if let Some(prompt) = self.session.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(Message::system(prompt));
        }
        messages.push(Message::user(message));

        let mut request = ProviderRequest::new(messages);
        if let Some(model) = &self.session.model {
            request = request.with_model(model.clone());
        }
        if let Some(max_tokens) = self.session.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.session.temperature {
            request = request.with_temperature(temperature);
        }

        self.backend
            .send_message_stream(&request)
            .await
            .map_err(SessionError::Backend)
    }
}

/// Route summary for listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouteInfo {
    pub name: String,
    pub backend: String,
    pub tools: Vec<String>,
    pub max_rounds: usize,
}

#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Route>,
    order: Vec<String>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: Route) -> Result<(), RouterError> {
        if self.routes.contains_key(&route.name) {
            return Err(RouterError::DuplicateRoute(route.name));
        }
        self.order.push(route.name.clone());
        self.routes.insert(route.name.clone(), route);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&Route, RouterError> {
        self.routes
            .get(name)
            .ok_or_else(|| RouterError::UnknownRoute(name.to_string()))
    }

    /// Route names in the order they were added
    pub fn route_names(&self) -> &[String] {
        &self.order
    }

    pub fn describe(&self) -> Vec<RouteInfo> {
        self.order
            .iter()
            .filter_map(|name| self.routes.get(name))
            .map(|route| RouteInfo {
                name: route.name.clone(),
                backend: route.backend.name().to_string(),
                tools: route.tools.tool_names(),
                max_rounds: route.session.max_rounds,
            })
            .collect()
    }

    /// Run one session on the named route
    pub async fn dispatch(&self, route: &str, message: &str) -> Result<SessionOutcome, RouterError> {
        self.dispatch_until_cancelled(route, message, CancellationToken::new())
            .await
    }

    /// Run one session on the named route, stopping when `token` is cancelled
    pub async fn dispatch_until_cancelled(
        &self,
        route: &str,
        message: &str,
        token: CancellationToken,
    ) -> Result<SessionOutcome, RouterError> {
        let route = self.resolve(route)?;
        let mut session = route.start_session(message);
        tracing::info!(route = %route.name, session_id = %session.id(), "Dispatching message");

        let result = session.run_until_cancelled(token).await;
        let outcome = match &result {
            Ok(_) => "completed",
            Err(SessionError::Aborted { .. }) => "aborted",
            Err(SessionError::Cancelled { .. }) => "cancelled",
            Err(SessionError::Backend(_)) => "backend_error",
        };
        METRICS.record_session(&route.name, outcome, session.rounds());
        result.map_err(RouterError::from)
    }

    /// Build the route table from configuration and ready backends
    pub fn from_config(config: &Config, backends: &HashMap<String, Arc<dyn ModelBackend>>) -> Result<Self> {
        let catalog = builtin_catalog(&config.tools.command)?;

        let mut router = Router::new();
        for settings in &config.routes {
            let backend = backends
                .get(&settings.backend)
                .with_context(|| {
                    format!(
                        "Route '{}' uses unknown backend '{}'",
                        settings.name, settings.backend
                    )
                })?;
            let tools = ToolRegistry::from_names(&settings.tools, &catalog)
                .with_context(|| format!("Route '{}' has an invalid tool list", settings.name))?
                .snapshot();

            router.add_route(Route::new(
                settings.name.clone(),
                Arc::clone(backend),
                tools,
                session_config(settings),
            ))?;
        }

        Ok(router)
    }
}

fn session_config(settings: &RouteSettings) -> SessionConfig {
    SessionConfig {
        max_rounds: settings.max_rounds,
        system_prompt: settings.system_prompt.clone(),
        ..SessionConfig::default()
    }
}
