use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gwsync operator",
        version = "0.1.0",
        description = "Desired-state API of the gwsync operator. Applied resources are reconciled into the configured gateway or dashboard control plane."
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "resources", description = "Apply, inspect and delete reconciled resources")
    ),
    paths(
        handlers::get_version,
        handlers::list_resources,
        handlers::get_resource,
        handlers::apply_resource,
        handlers::delete_resource,
        handlers::get_deletion_safety,
    ),
    components(schemas(
        handlers::ApiError,
        handlers::VersionInfo,
        handlers::ResourceView,
        handlers::ListResourcesQuery,
        handlers::DeletionSafetyView,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/version", get(handlers::get_version))
        .route("/resources/{kind}", get(handlers::list_resources))
        .route(
            "/resources/{kind}/{namespace}/{name}",
            get(handlers::get_resource)
                .put(handlers::apply_resource)
                .delete(handlers::delete_resource),
        )
        .route(
            "/resources/{kind}/{namespace}/{name}/deletion-safety",
            get(handlers::get_deletion_safety),
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
