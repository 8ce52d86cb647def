pub mod billing;
pub mod generate;
pub mod health;
pub mod license;

use axum::Router;

use crate::state::AppState;

/// All routes, before state and middleware layers.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            generate::router().nest("/license", license::router()),
        )
        .nest("/billing", billing::router())
}
