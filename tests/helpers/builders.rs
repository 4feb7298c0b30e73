use std::collections::BTreeSet;

use grc_acl::acl::{grants, registry, Edge, Engine, Grant, ObjectRef, RoleKey, RoleRegistry, RuleTree};
use grc_acl::storage;
use sea_orm::DatabaseConnection;
use serde_json::Value;

pub fn obj(object_type: &str, id: i32) -> ObjectRef {
    ObjectRef::new(object_type, id)
}

pub fn tree(value: Value) -> RuleTree {
    RuleTree::from_json(&value).expect("Invalid rule tree")
}

/// Materialize `value` on an empty registry.
pub async fn install(db: &DatabaseConnection, engine: &Engine, value: Value) {
    engine
        .diff_and_apply(db, &RuleTree::new(), &tree(value))
        .await
        .expect("Failed to install rule tree");
}

pub async fn map(db: &DatabaseConnection, engine: &Engine, a: &ObjectRef, b: &ObjectRef) -> Edge {
    storage::create_mapping(db, engine, a, b)
        .await
        .expect("Failed to create mapping")
}

pub async fn role_id(db: &DatabaseConnection, object_type: &str, name: &str) -> i32 {
    let reg = RoleRegistry::load(db).await.expect("Failed to load registry");
    reg.find(&RoleKey::new(object_type, name))
        .unwrap_or_else(|| panic!("role {name} on {object_type} not found"))
        .id()
}

pub async fn all_grants(db: &DatabaseConnection) -> Vec<Grant> {
    grants::all(db).await.expect("Failed to list grants")
}

/// Grants as (person, role, object), independent of row ids.
pub async fn grant_set(db: &DatabaseConnection) -> BTreeSet<(i32, RoleKey, ObjectRef)> {
    let reg = RoleRegistry::load(db).await.expect("Failed to load registry");
    all_grants(db)
        .await
        .into_iter()
        .map(|g| {
            let role = reg.get(g.role_id).expect("Grant with unknown role");
            (g.person_id, RoleKey::new(role.object_type(), role.name()), g.object)
        })
        .collect()
}

/// Builder for assigning root roles in tests
pub struct GrantBuilder {
    person_id: i32,
    object_type: String,
    role: String,
    object: Option<ObjectRef>,
}

impl GrantBuilder {
    pub fn new(person_id: i32) -> Self {
        Self {
            person_id,
            object_type: "Audit".to_string(),
            role: "Admin".to_string(),
            object: None,
        }
    }

    pub fn role(mut self, object_type: &str, name: &str) -> Self {
        self.object_type = object_type.to_string();
        self.role = name.to_string();
        self
    }

    pub fn on(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub async fn create(self, db: &DatabaseConnection, engine: &Engine) -> Grant {
        let id = role_id(db, &self.object_type, &self.role).await;
        let role = registry::root_role(db, id).await.expect("Not a root role");
        let object = self
            .object
            .unwrap_or_else(|| ObjectRef::new(self.object_type.as_str(), 1));
        engine
            .grant_base_role(db, self.person_id, &role, &object)
            .await
            .expect("Failed to grant base role")
    }
}
