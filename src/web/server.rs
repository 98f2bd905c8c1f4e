use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::api::{get_stored_window, health_check, list_open_windows, query, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query))
        .route("/api/windows", get(list_open_windows))
        .route("/api/windows/:id", get(get_stored_window))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the HTTP API until `shutdown_rx` turns true
pub async fn run_server(
    state: AppState,
    listen: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen = %listen, "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
