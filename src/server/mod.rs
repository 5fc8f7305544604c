//! HTTP surface of the order desk.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use api::{AppState, SharedState, api_router};

/// Configuration for the dashboard server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests from any origin.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            permissive_cors: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState, config: &ServerConfig) -> Router {
    let mut app = api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if config.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "order desk listening");
    println!("Order desk running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::LocalBlobStore;
    use crate::config::sample_config;
    use crate::store::MemoryDatabase;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(config: &ServerConfig) -> Router {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryDatabase::new()),
            sample_config(),
            Arc::new(LocalBlobStore::new(std::env::temp_dir().join("orderdesk-server-test"))),
            "docs",
        ));
        build_router(state, config)
    }

    #[tokio::test]
    async fn test_health_through_full_router() {
        let app = test_router(&ServerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router(&ServerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_permissive_cors_answers_preflight() {
        let config = ServerConfig {
            permissive_cors: true,
            ..Default::default()
        };
        let response = test_router(&config)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/orders")
                    .header("origin", "http://localhost:3000")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8501);
        assert!(!config.permissive_cors);
    }
}
