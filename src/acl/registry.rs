use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::acl::errors::AclError;
use crate::acl::tree::{RoleKey, RoleSpec};
use crate::acl::types::{DerivedRole, Role};
use crate::entities::acl_role;

/// In-memory view of the role registry: roles addressed by id, with the
/// parent -> children index the propagation walk needs.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: HashMap<i32, Role>,
    children: HashMap<i32, Vec<DerivedRole>>,
    by_key: HashMap<RoleKey, i32>,
}

impl RoleRegistry {
    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, AclError> {
        let models = acl_role::Entity::find()
            .order_by_asc(acl_role::Column::Id)
            .all(db)
            .await?;
        Ok(Self::from_roles(models.into_iter().map(Role::from)))
    }

    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut registry = Self::default();
        for role in roles {
            registry
                .by_key
                .insert(RoleKey::new(role.object_type(), role.name()), role.id());
            if let Role::Derived(derived) = &role {
                registry
                    .children
                    .entry(derived.parent_role_id)
                    .or_default()
                    .push(derived.clone());
            }
            registry.roles.insert(role.id(), role);
        }
        registry
    }

    pub fn get(&self, id: i32) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn find(&self, key: &RoleKey) -> Option<&Role> {
        self.by_key.get(key).and_then(|id| self.roles.get(id))
    }

    /// Roles one propagation hop below `role_id`.
    pub fn children(&self, role_id: i32) -> &[DerivedRole] {
        self.children
            .get(&role_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn roles_on<'a>(&'a self, object_type: &'a str) -> impl Iterator<Item = &'a Role> + 'a {
        self.roles
            .values()
            .filter(move |r| r.object_type() == object_type)
    }

    pub fn has_children(&self, role_id: i32) -> bool {
        !self.children(role_id).is_empty()
    }

    /// `role_id` and every role below it, parents first.
    pub fn subtree(&self, role_id: i32) -> Vec<i32> {
        let mut out = vec![role_id];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.children(out[i]).iter().map(|c| c.id));
            i += 1;
        }
        out
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoleKey> + '_ {
        self.by_key.keys()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The registry key of a role's parent.
    pub fn parent_key(&self, role: &Role) -> Option<RoleKey> {
        let parent = self.roles.get(&role.parent_role_id()?)?;
        Some(RoleKey::new(parent.object_type(), parent.name()))
    }

    /// Whether the registry holds `spec` exactly: same bits, same parent.
    pub fn holds(&self, spec: &RoleSpec) -> Result<(), String> {
        let role = self
            .find(&spec.key)
            .ok_or_else(|| format!("role {} is missing", spec.key))?;
        if role.permissions() != spec.permissions {
            return Err(format!(
                "role {} has permissions {} instead of {}",
                spec.key,
                role.permissions(),
                spec.permissions
            ));
        }
        if self.parent_key(role) != spec.parent {
            return Err(format!("role {} hangs off a different parent", spec.key));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeReport {
    pub inserted: usize,
    pub updated: usize,
}

/// Write `specs` into the registry. Missing roles are inserted with their
/// parent link, present roles get their permission bits refreshed. Specs must
/// list parents before children, as [`RuleTree::flatten`](crate::acl::tree::RuleTree::flatten) does.
pub async fn materialize<C: ConnectionTrait>(
    db: &C,
    specs: &[RoleSpec],
) -> Result<MaterializeReport, AclError> {
    let mut registry = RoleRegistry::load(db).await?;
    let mut report = MaterializeReport::default();

    for spec in specs {
        let parent_role_id = match &spec.parent {
            None => None,
            Some(parent) => Some(registry.find(parent).map(|r| r.id()).ok_or_else(|| {
                AclError::InvalidRuleTree(format!(
                    "parent {parent} of {} is not materialized",
                    spec.key
                ))
            })?),
        };

        if let Some(existing) = registry.find(&spec.key) {
            if existing.parent_role_id() != parent_role_id {
                return Err(AclError::RuleTreeMismatch(format!(
                    "role {} already exists under a different parent",
                    spec.key
                )));
            }
            if existing.permissions() != spec.permissions {
                update_permissions(db, existing.id(), spec).await?;
                report.updated += 1;
            }
            continue;
        }

        let model = acl_role::ActiveModel {
            object_type: Set(spec.key.object_type.clone()),
            name: Set(spec.key.name.clone()),
            can_read: Set(spec.permissions.read),
            can_update: Set(spec.permissions.update),
            can_delete: Set(spec.permissions.delete),
            internal: Set(spec.internal()),
            parent_role_id: Set(parent_role_id),
            ..Default::default()
        }
        .insert(db)
        .await?;

        tracing::debug!(role_id = model.id, role = %spec.key, "Materialized role");
        let role = Role::from(model);
        registry.by_key.insert(spec.key.clone(), role.id());
        if let Role::Derived(derived) = &role {
            registry
                .children
                .entry(derived.parent_role_id)
                .or_default()
                .push(derived.clone());
        }
        registry.roles.insert(role.id(), role);
        report.inserted += 1;
    }

    Ok(report)
}

pub async fn update_permissions<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
    spec: &RoleSpec,
) -> Result<(), AclError> {
    acl_role::ActiveModel {
        id: Set(role_id),
        can_read: Set(spec.permissions.read),
        can_update: Set(spec.permissions.update),
        can_delete: Set(spec.permissions.delete),
        ..Default::default()
    }
    .update(db)
    .await?;
    Ok(())
}

/// Delete roles by id. Callers remove the roles' grants first.
pub async fn delete_roles<C: ConnectionTrait>(db: &C, ids: &[i32]) -> Result<u64, AclError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = acl_role::Entity::delete_many()
        .filter(acl_role::Column::Id.is_in(ids.iter().copied()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Load a role that is allowed to be assigned directly.
pub async fn root_role<C: ConnectionTrait>(
    db: &C,
    role_id: i32,
) -> Result<crate::acl::types::RootRole, AclError> {
    let model = acl_role::Entity::find_by_id(role_id)
        .one(db)
        .await?
        .ok_or_else(|| AclError::NotFound(format!("role {role_id}")))?;
    Role::from(model).try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::types::{Permissions, RootRole};

    fn registry() -> RoleRegistry {
        RoleRegistry::from_roles(vec![
            Role::Root(RootRole {
                id: 1,
                object_type: "Audit".into(),
                name: "Admin".into(),
                permissions: Permissions::RUD,
            }),
            Role::Derived(DerivedRole {
                id: 2,
                object_type: "Assessment".into(),
                name: "Admin*Audit".into(),
                permissions: Permissions::RUD,
                parent_role_id: 1,
            }),
            Role::Derived(DerivedRole {
                id: 3,
                object_type: "Comment".into(),
                name: "Admin*Audit*Assessment".into(),
                permissions: Permissions::READ,
                parent_role_id: 2,
            }),
        ])
    }

    #[test]
    fn test_children_and_subtree() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.children(1).len(), 1);
        assert_eq!(reg.children(1)[0].id, 2);
        assert!(!reg.has_children(3));
        assert_eq!(reg.subtree(1), vec![1, 2, 3]);
        assert_eq!(reg.subtree(2), vec![2, 3]);
    }

    #[test]
    fn test_holds_reports_discrepancies() {
        let reg = registry();
        let spec = RoleSpec {
            key: RoleKey::new("Assessment", "Admin*Audit"),
            permissions: Permissions::RUD,
            parent: Some(RoleKey::new("Audit", "Admin")),
        };
        assert!(reg.holds(&spec).is_ok());

        let wrong_bits = RoleSpec {
            permissions: Permissions::READ,
            ..spec.clone()
        };
        assert!(reg.holds(&wrong_bits).unwrap_err().contains("permissions"));

        let missing = RoleSpec {
            key: RoleKey::new("Issue", "Admin*Audit"),
            ..spec
        };
        assert!(reg.holds(&missing).unwrap_err().contains("missing"));
    }
}
