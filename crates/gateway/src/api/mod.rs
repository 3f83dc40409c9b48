pub mod artifacts;
pub mod auth;
pub mod error;
pub mod generate;
pub mod jobs;
pub mod models;
pub mod ops;
pub mod providers;
pub mod requests;
pub mod schema;
pub mod sessions;
pub mod users;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `require_api_token` bearer-token/API-key middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(ops::health))
        .route("/ready", get(ops::ready))
        .route("/version", get(ops::version))
        .route("/metrics", get(ops::metrics));

    let protected = Router::new()
        // Core generation
        .route("/v1/generate", post(generate::generate))
        .route("/v1/sessions/:session_id/generate", post(generate::session_generate))
        .route("/v1/sessions/:session_id/regenerate", post(generate::session_regenerate))
        // Sessions
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions/:session_id", get(sessions::get_session))
        .route("/v1/sessions/:session_id", delete(sessions::close_session))
        .route("/v1/sessions/:session_id/reset", post(sessions::reset_session))
        // Models (catalog, lifecycle, download)
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/search", get(models::search_models))
        .route("/v1/models/download", post(models::download_model))
        .route("/v1/models/loaded", get(models::loaded_models))
        .route("/v1/models/:id", get(models::get_model))
        .route("/v1/models/:id/default", post(models::set_default))
        .route("/v1/models/:id/status", get(models::model_status))
        .route("/v1/models/:id/load", post(models::load_model))
        .route("/v1/models/:id/unload", post(models::unload_model))
        // Jobs (downloads)
        .route("/v1/jobs", get(jobs::list_jobs))
        .route("/v1/jobs/:job_id", get(jobs::get_job))
        .route("/v1/jobs/:job_id/cancel", post(jobs::cancel_job))
        // Requests (queue inspection/cancel)
        .route("/v1/requests/:id/status", get(requests::get_request))
        .route("/v1/requests/:id/cancel", post(requests::cancel_request))
        // Artifacts
        .route("/v1/artifacts/:id", get(artifacts::get_artifact))
        // Providers
        .route("/v1/providers", get(providers::list_providers))
        // Parameter schema
        .route("/v1/schema", get(schema::get_schema))
        // Users / credits
        .route("/v1/users", get(users::list_users))
        .route("/v1/users/:user_id", get(users::get_user))
        .route("/v1/users/:user_id/credits", post(users::set_credits))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
