use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::acl::types::ObjectRef;

#[derive(Debug, Error, Diagnostic)]
pub enum AclError {
    #[error("Invalid grant operation: {0}")]
    #[diagnostic(
        code(grc_acl::acl::invalid_grant_operation),
        help("Root grants are assigned and revoked directly; derived grants only change through mapping edges")
    )]
    InvalidGrantOperation(String),

    #[error("Rule tree mismatch: {0}")]
    #[diagnostic(
        code(grc_acl::acl::rule_tree_mismatch),
        help("The role registry matches neither the migration's old nor new rule tree; reconcile it manually before re-running")
    )]
    RuleTreeMismatch(String),

    #[error("Propagation of role {role_id} reached {object} after {depth} hops")]
    #[diagnostic(
        code(grc_acl::acl::cycle_depth_exceeded),
        help("Check acl_roles.parent_role_id for a cycle, or raise propagation.max_depth")
    )]
    CycleDepthExceeded {
        role_id: i32,
        object: ObjectRef,
        depth: usize,
    },

    #[error("Invalid rule tree: {0}")]
    #[diagnostic(
        code(grc_acl::acl::invalid_rule_tree),
        help("Labels look like \"Assessment RUD\" or \"Relationship R\"; permissions are any of R, U, D")
    )]
    InvalidRuleTree(String),

    #[error("Root role `{name}` on `{object_type}` is removed by the rule change but still has {grants} grants")]
    #[diagnostic(
        code(grc_acl::acl::root_role_in_use),
        help("Revoke the remaining assignments before removing the role from the rule tree")
    )]
    RootRoleInUse {
        object_type: String,
        name: String,
        grants: u64,
    },

    #[error("Invalid object reference `{0}`")]
    #[diagnostic(
        code(grc_acl::acl::invalid_object_ref),
        help("Objects are written as \"Type/id\", e.g. \"Audit/12\"")
    )]
    InvalidObjectRef(String),

    #[error("{0} not found")]
    #[diagnostic(code(grc_acl::acl::not_found))]
    NotFound(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(grc_acl::acl::db))]
    Db(#[from] sea_orm::DbErr),
}

impl IntoResponse for AclError {
    fn into_response(self) -> Response {
        let status = match &self {
            AclError::InvalidGrantOperation(_)
            | AclError::InvalidRuleTree(_)
            | AclError::InvalidObjectRef(_) => StatusCode::BAD_REQUEST,
            AclError::NotFound(_) => StatusCode::NOT_FOUND,
            AclError::RootRoleInUse { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
