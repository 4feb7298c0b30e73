use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::acl::errors::AclError;
use crate::acl::snapshot::SnapshotPair;
use crate::acl::types::{
    AssignRequest, CheckRequest, CheckResponse, MappingRequest, ObjectRef, RevokeResponse,
    SeedResponse, SnapshotRequest,
};
use crate::acl::{engine, AclState};
use crate::storage;

pub fn router(state: Arc<AclState>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/grants", post(handle_assign))
        .route("/v1/grants/{id}", delete(handle_revoke))
        .route("/v1/mappings", post(handle_create_mapping))
        .route("/v1/mappings/{id}", delete(handle_delete_mapping))
        .route("/v1/snapshots", post(handle_seed_snapshots))
        .route("/healthz", get(health))
        .with_state(state)
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, AclError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "ACL request failed");
            e.into_response()
        }
    }
}

async fn handle_check(
    State(state): State<Arc<AclState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let result = async {
        let object = ObjectRef::parse_input(&req.object)?;
        let allowed = engine::check(&state.db, req.person_id, &object, req.permission).await?;
        Ok::<_, AclError>(CheckResponse { allowed })
    }
    .await;
    respond(StatusCode::OK, result)
}

async fn handle_assign(
    State(state): State<Arc<AclState>>,
    Json(req): Json<AssignRequest>,
) -> impl IntoResponse {
    let result = async {
        let object = ObjectRef::parse_input(&req.object)?;
        state
            .engine
            .grant_base_role_by_id(&state.db, req.person_id, req.role_id, &object)
            .await
    }
    .await;
    respond(StatusCode::CREATED, result)
}

async fn handle_revoke(
    State(state): State<Arc<AclState>>,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let result = state
        .engine
        .revoke_base_role(&state.db, id)
        .await
        .map(|deleted| RevokeResponse { deleted });
    respond(StatusCode::OK, result)
}

async fn handle_create_mapping(
    State(state): State<Arc<AclState>>,
    Json(req): Json<MappingRequest>,
) -> impl IntoResponse {
    let result = async {
        let source = ObjectRef::parse_input(&req.source)?;
        let destination = ObjectRef::parse_input(&req.destination)?;
        storage::create_mapping(&state.db, &state.engine, &source, &destination).await
    }
    .await;
    respond(StatusCode::CREATED, result)
}

async fn handle_delete_mapping(
    State(state): State<Arc<AclState>>,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let result = storage::delete_mapping(&state.db, &state.engine, id)
        .await
        .map(|deleted| RevokeResponse { deleted });
    respond(StatusCode::OK, result)
}

async fn handle_seed_snapshots(
    State(state): State<Arc<AclState>>,
    Json(req): Json<SnapshotRequest>,
) -> impl IntoResponse {
    let result = async {
        let pairs = req
            .snapshots
            .iter()
            .map(|s| {
                Ok::<_, AclError>(SnapshotPair {
                    snapshot_id: s.snapshot_id,
                    parent: ObjectRef::parse_input(&s.parent)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = state.engine.seed_snapshots(&state.db, &pairs).await?;
        Ok::<_, AclError>(SeedResponse { inserted })
    }
    .await;
    respond(StatusCode::OK, result)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
