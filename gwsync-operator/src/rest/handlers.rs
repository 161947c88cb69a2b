use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use gwsync_core::{
    DeletionSafety, Identity, Kind, Resource, ResourceRef, ResourceStore, StoreError,
    deletion_safety,
};

use crate::audit::OperatorAuditLogger;

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub audit: Arc<OperatorAuditLogger>,
}

/// API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: 400,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            400 => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ApiError {
                error: msg,
                code: 404,
            },
            StoreError::Conflict(msg) => ApiError {
                error: msg,
                code: 409,
            },
            StoreError::VersionMismatch { expected, actual } => ApiError {
                error: format!("Version mismatch: expected {}, got {}", expected, actual),
                code: 409,
            },
            StoreError::Internal(msg) => ApiError {
                error: msg,
                code: 500,
            },
        }
    }
}

fn parse_kind(kind: &str) -> Result<Kind, ApiError> {
    kind.parse().map_err(ApiError::bad_request)
}

fn identity(namespace: &str, name: &str) -> Result<Identity, ApiError> {
    if namespace.trim().is_empty() || name.trim().is_empty() {
        return Err(ApiError::bad_request("namespace and name must not be empty"));
    }
    Ok(Identity::new(namespace, name))
}

// =============================================================================
// System
// =============================================================================

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
#[utoipa::path(
    get,
    path = "/api/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Resources
// =============================================================================

/// Stored resource with its reconcile status
#[derive(Serialize, ToSchema)]
pub struct ResourceView {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub generation: u64,
    pub resource_version: u64,
    pub created_at: String,
    pub deletion_requested: bool,
    pub finalizers: Vec<String>,
    /// Desired state as applied
    #[schema(value_type = Object)]
    pub spec: Value,
    /// Remote id, hashes, links and the last transaction
    #[schema(value_type = Object)]
    pub status: Value,
}

impl From<Resource> for ResourceView {
    fn from(resource: Resource) -> Self {
        Self {
            kind: resource.kind.to_string(),
            deletion_requested: resource.meta.deletion_requested(),
            status: serde_json::to_value(&resource.status).unwrap_or_default(),
            namespace: resource.meta.namespace,
            name: resource.meta.name,
            uid: resource.meta.uid,
            generation: resource.meta.generation,
            resource_version: resource.meta.resource_version,
            created_at: resource.meta.created_at.to_rfc3339(),
            finalizers: resource.meta.finalizers,
            spec: resource.spec,
        }
    }
}

/// Query parameters for list resources
#[derive(Deserialize, ToSchema)]
pub struct ListResourcesQuery {
    /// Only list resources in this namespace
    pub namespace: Option<String>,
}

/// List resources of one kind
#[utoipa::path(
    get,
    path = "/api/v1/resources/{kind}",
    params(
        ("kind" = String, Path, description = "Resource kind, singular or plural (e.g. apidefinitions)"),
        ("namespace" = Option<String>, Query, description = "Filter by namespace")
    ),
    responses(
        (status = 200, description = "List of resources", body = Vec<ResourceView>),
        (status = 400, description = "Unknown kind", body = ApiError)
    ),
    tag = "resources"
)]
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<ListResourcesQuery>,
) -> Result<Json<Vec<ResourceView>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let resources = state
        .store
        .list(kind, query.namespace.as_deref().filter(|ns| !ns.is_empty()))
        .await?;
    Ok(Json(resources.into_iter().map(ResourceView::from).collect()))
}

/// Get a resource
#[utoipa::path(
    get,
    path = "/api/v1/resources/{kind}/{namespace}/{name}",
    params(
        ("kind" = String, Path, description = "Resource kind"),
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Name")
    ),
    responses(
        (status = 200, description = "Resource found", body = ResourceView),
        (status = 404, description = "Resource not found", body = ApiError)
    ),
    tag = "resources"
)]
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<ResourceView>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = identity(&namespace, &name)?;
    let resource = state
        .store
        .get(kind, &id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, id)))?;
    Ok(Json(resource.into()))
}

/// Create or replace the desired spec of a resource
#[utoipa::path(
    put,
    path = "/api/v1/resources/{kind}/{namespace}/{name}",
    params(
        ("kind" = String, Path, description = "Resource kind"),
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Name")
    ),
    request_body(content = serde_json::Value, description = "Desired spec"),
    responses(
        (status = 200, description = "Spec stored, reconcile scheduled", body = ResourceView),
        (status = 400, description = "Unknown kind or spec is not an object", body = ApiError),
        (status = 409, description = "Resource is being deleted", body = ApiError)
    ),
    tag = "resources"
)]
pub async fn apply_resource(
    State(state): State<Arc<AppState>>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
    Json(spec): Json<Value>,
) -> Result<Json<ResourceView>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = identity(&namespace, &name)?;
    if !spec.is_object() {
        return Err(ApiError::bad_request("spec must be a JSON object"));
    }

    let resource = state.store.apply(kind, &id, spec).await?;
    state
        .audit
        .resource_applied(&resource.reference(), resource.meta.generation);
    Ok(Json(resource.into()))
}

/// Request deletion of a resource
///
/// Guarded resources stay until their remote counterpart is gone and nothing
/// references them any more.
#[utoipa::path(
    delete,
    path = "/api/v1/resources/{kind}/{namespace}/{name}",
    params(
        ("kind" = String, Path, description = "Resource kind"),
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Name")
    ),
    responses(
        (status = 202, description = "Deletion requested"),
        (status = 404, description = "Resource not found", body = ApiError)
    ),
    tag = "resources"
)]
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = identity(&namespace, &name)?;
    state.store.delete(kind, &id).await?;
    state.audit.deletion_requested(&ResourceRef::new(kind, &id));
    Ok(StatusCode::ACCEPTED)
}

/// Whether a resource can be deleted right now
#[derive(Serialize, ToSchema)]
pub struct DeletionSafetyView {
    /// new, guarded, pending_deletion, blocked, torn_down or removed
    pub phase: String,
    pub blocked: bool,
    /// Resources that must be deleted first, as "kind namespace/name"
    pub blockers: Vec<String>,
    /// The remote counterpart may still exist
    pub remote_present: bool,
}

impl From<DeletionSafety> for DeletionSafetyView {
    fn from(safety: DeletionSafety) -> Self {
        Self {
            phase: safety.phase.as_str().to_string(),
            blocked: safety.blocked,
            blockers: safety.blockers.iter().map(ToString::to_string).collect(),
            remote_present: safety.remote_present,
        }
    }
}

/// Get the deletion safety of a resource
#[utoipa::path(
    get,
    path = "/api/v1/resources/{kind}/{namespace}/{name}/deletion-safety",
    params(
        ("kind" = String, Path, description = "Resource kind"),
        ("namespace" = String, Path, description = "Namespace"),
        ("name" = String, Path, description = "Name")
    ),
    responses(
        (status = 200, description = "Deletion safety", body = DeletionSafetyView),
        (status = 400, description = "Unknown kind", body = ApiError)
    ),
    tag = "resources"
)]
pub async fn get_deletion_safety(
    State(state): State<Arc<AppState>>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<DeletionSafetyView>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = identity(&namespace, &name)?;
    let safety = deletion_safety(state.store.as_ref(), kind, &id).await?;
    Ok(Json(safety.into()))
}
