//! Defines routes for the repository operations a host file picker calls.
//!
//! ## Structure
//! - **Type-level endpoints**
//!   - `GET    /repositories/options` : instance option names
//!   - `POST   /repositories/validate`: validate settings, upload attachments
//!   - `GET    /repositories`         : list instances
//!   - `POST   /repositories`         : validate and create an instance
//!
//! - **Instance-level endpoints**
//!   - `GET    /repositories/{id}`               : instance settings (no secrets)
//!   - `DELETE /repositories/{id}`               : remove instance
//!   - `GET    /repositories/{id}/listing`       : folder listing (`?path=&page=`)
//!   - `POST   /repositories/{id}/fetch`         : download into the local area
//!   - `GET    /repositories/{id}/files/{*key}`  : 302 to a presigned URL
//!
//! The wildcard `*key` allows nested keys like `docs/2025/report.pdf`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        repository_handlers::{
            create_instance, delete_instance, fetch_file, get_instance, list_instances, listing,
            option_names, serve_redirect, validate_instance,
        },
    },
    services::instance_service::InstanceService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all repository routes.
///
/// The router carries shared state (`InstanceService`) to all handlers.
pub fn routes() -> Router<InstanceService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Type-level routes
        .route("/repositories/options", get(option_names))
        .route("/repositories/validate", post(validate_instance))
        .route("/repositories", get(list_instances).post(create_instance))
        // Instance-level routes
        .route(
            "/repositories/{id}",
            get(get_instance).delete(delete_instance),
        )
        .route("/repositories/{id}/listing", get(listing))
        .route("/repositories/{id}/fetch", post(fetch_file))
        .route("/repositories/{id}/files/{*key}", get(serve_redirect))
}
