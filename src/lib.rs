//! Networked doorbell: a hub that fans button events out to chimes over
//! websockets, and the chime client that rings a relay.
//!
//! Chimes announce themselves with a hello, get a bounded per-connection
//! queue, and receive events in order. Snoozes are kept per chime name and
//! survive reconnects.

pub mod chime;
pub mod config;
pub mod devices;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod sources;

pub use config::{ChimeConfig, HubConfig};
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::ChimeRegistry;

use axum::routing::{get, post};
use handlers::{http, ws};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the hub router. Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let button_routes = axum::Router::new()
        .route("/push", post(http::button_push))
        .route("/release", post(http::button_release))
        .route("/push-release", post(http::button_push_release));

    let chime_routes = axum::Router::new()
        .route("/snooze", post(http::snooze))
        .route("/unsnooze", post(http::unsnooze));

    axum::Router::new()
        .route("/doorbell", get(ws::doorbell_ws))
        .route("/chimes", get(http::list_chimes))
        .route("/ping", get(http::ping))
        .route("/health", get(http::health))
        .nest("/button", button_routes)
        .nest("/chime", chime_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
