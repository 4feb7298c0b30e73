//! Object-level access control for the GRC graph.
//!
//! Roles are instantiated as grants `(person, role, object)`. A role assigned
//! directly is a root role; its rule tree spawns derived roles one hop at a
//! time across the mapping graph, and the engine keeps the derived grants in
//! step with assignments, mappings and rule changes.

pub mod differ;
pub mod engine;
pub mod errors;
pub mod grants;
pub mod registry;
pub mod snapshot;
pub mod tree;
pub mod types;
pub mod versions;
pub mod web;

pub use differ::{diff, DiffReport, RuleDiff};
pub use engine::{check, Engine};
pub use errors::AclError;
pub use registry::RoleRegistry;
pub use snapshot::SnapshotPair;
pub use tree::{EdgeLabel, RoleKey, RoleSpec, RuleNode, RuleTree};
pub use types::{Edge, Grant, ObjectRef, Permission, Permissions, Role, RootRole};

use sea_orm::DatabaseConnection;

/// Shared state of the ACL HTTP surface.
#[derive(Clone)]
pub struct AclState {
    pub db: DatabaseConnection,
    pub engine: Engine,
}
