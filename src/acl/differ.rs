//! Applying a change of rule tree to the registry and the grant store.

use std::collections::{BTreeSet, HashMap, HashSet};

use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::acl::engine::{Engine, Walk};
use crate::acl::errors::AclError;
use crate::acl::grants;
use crate::acl::registry::{self, RoleRegistry};
use crate::acl::tree::{RoleKey, RoleSpec, RuleTree};

/// Structural delta between two rule trees, keyed by role path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    /// In `new` only; parents before children.
    pub added: Vec<RoleSpec>,
    /// In `old` only; children before parents.
    pub removed: Vec<RoleSpec>,
    /// In both with different permission bits, as `new` has them.
    pub changed: Vec<RoleSpec>,
}

impl RuleDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff(old: &RuleTree, new: &RuleTree) -> Result<RuleDiff, AclError> {
    let old_specs = old.flatten()?;
    let new_specs = new.flatten()?;
    let old_by_key: HashMap<&RoleKey, &RoleSpec> =
        old_specs.iter().map(|s| (&s.key, s)).collect();
    let new_by_key: HashMap<&RoleKey, &RoleSpec> =
        new_specs.iter().map(|s| (&s.key, s)).collect();

    let mut delta = RuleDiff::default();
    for spec in &new_specs {
        match old_by_key.get(&spec.key) {
            None => delta.added.push(spec.clone()),
            Some(prev) if prev.permissions != spec.permissions => {
                delta.changed.push(spec.clone())
            }
            Some(_) => {}
        }
    }
    for spec in old_specs.iter().rev() {
        if !new_by_key.contains_key(&spec.key) {
            delta.removed.push(spec.clone());
        }
    }
    Ok(delta)
}

/// What [`Engine::diff_and_apply`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub already_applied: bool,
    pub roles_added: usize,
    pub roles_removed: usize,
    pub roles_changed: usize,
    pub grants_removed: usize,
    pub grants_created: usize,
}

/// The registry holds exactly `expected`: every spec with its bits and
/// parent, and no role beyond them.
fn registry_matches(registry: &RoleRegistry, expected: &[RoleSpec]) -> Result<(), String> {
    for spec in expected {
        registry.holds(spec)?;
    }
    let known: HashSet<&RoleKey> = expected.iter().map(|s| &s.key).collect();
    let mut extra: Vec<&RoleKey> = registry.keys().filter(|k| !known.contains(k)).collect();
    extra.sort();
    match extra.first() {
        Some(key) => Err(format!("role {key} is not part of the rule tree")),
        None => Ok(()),
    }
}

impl Engine {
    /// Move the registry from `old` to `new` and bring the grant store along:
    /// removed branches lose their roles and grants, changed roles get their
    /// bits rewritten, added branches are materialized and back-filled across
    /// the current mapping graph. Re-running an applied change is a no-op.
    pub async fn diff_and_apply<C: TransactionTrait>(
        &self,
        db: &C,
        old: &RuleTree,
        new: &RuleTree,
    ) -> Result<DiffReport, AclError> {
        let delta = diff(old, new)?;
        let new_specs = new.flatten()?;
        let old_specs = old.flatten()?;

        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;

        if registry_matches(&registry, &new_specs).is_ok() {
            tracing::info!("Rule tree already applied; nothing to do");
            txn.commit().await?;
            return Ok(DiffReport {
                already_applied: true,
                ..Default::default()
            });
        }
        registry_matches(&registry, &old_specs).map_err(|why| {
            tracing::error!(%why, "Role registry does not match the expected rule tree");
            AclError::RuleTreeMismatch(why)
        })?;

        let mut report = DiffReport::default();
        report.grants_removed = remove_roles(&txn, &registry, &delta.removed).await?;
        report.roles_removed = delta.removed.len();

        for spec in &delta.changed {
            if let Some(role) = registry.find(&spec.key) {
                registry::update_permissions(&txn, role.id(), spec).await?;
            }
        }
        report.roles_changed = delta.changed.len();

        if !delta.added.is_empty() {
            let materialized = registry::materialize(&txn, &delta.added).await?;
            report.roles_added = materialized.inserted;
            report.grants_created = self.backfill(&txn, &delta.added).await?;
        }

        txn.commit().await?;
        tracing::info!(
            roles_added = report.roles_added,
            roles_removed = report.roles_removed,
            roles_changed = report.roles_changed,
            grants_removed = report.grants_removed,
            grants_created = report.grants_created,
            "Applied rule tree change"
        );
        Ok(report)
    }

    /// Propagate newly added branches from every grant already holding one of
    /// their pre-existing parent roles.
    async fn backfill<C: ConnectionTrait>(
        &self,
        db: &C,
        added: &[RoleSpec],
    ) -> Result<usize, AclError> {
        let registry = RoleRegistry::load(db).await?;
        let added_keys: BTreeSet<&RoleKey> = added.iter().map(|s| &s.key).collect();
        let seed_roles: BTreeSet<i32> = added
            .iter()
            .filter_map(|s| s.parent.as_ref())
            .filter(|parent| !added_keys.contains(parent))
            .filter_map(|parent| registry.find(parent).map(|r| r.id()))
            .collect();
        let seed_roles: Vec<i32> = seed_roles.into_iter().collect();

        let mut walk = Walk::new(db, &registry, self.propagation.max_depth);
        for grant in grants::with_roles(db, &seed_roles).await? {
            walk.run(grant, None).await?;
        }
        Ok(walk.into_created().len())
    }
}

/// Delete the roles of removed branches with all their grants. A removed root
/// role must not carry grants anymore.
async fn remove_roles<C: ConnectionTrait>(
    db: &C,
    registry: &RoleRegistry,
    removed: &[RoleSpec],
) -> Result<usize, AclError> {
    let mut role_ids = Vec::new();
    for spec in removed {
        let Some(role) = registry.find(&spec.key) else {
            continue;
        };
        if spec.parent.is_none() {
            let in_use = grants::with_roles(db, &[role.id()]).await?.len() as u64;
            if in_use > 0 {
                return Err(AclError::RootRoleInUse {
                    object_type: spec.key.object_type.clone(),
                    name: spec.key.name.clone(),
                    grants: in_use,
                });
            }
        }
        role_ids.push(role.id());
    }

    let doomed: Vec<i32> = grants::with_roles(db, &role_ids)
        .await?
        .iter()
        .map(|g| g.id)
        .collect();
    let removed_grants = grants::delete_cascade(db, &doomed).await?;
    registry::delete_roles(db, &role_ids).await?;
    Ok(removed_grants.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::types::Permissions;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> RuleTree {
        RuleTree::from_json(&value).unwrap()
    }

    #[test]
    fn test_diff_identical_trees_is_empty() {
        let t = tree(json!({"Audit": {"Admin RUD": {"Assessment RUD": {}}}}));
        assert!(diff(&t, &t).unwrap().is_empty());
    }

    #[test]
    fn test_diff_added_removed_changed() {
        let old = tree(json!({
            "Audit": { "Admin RUD": { "Assessment RUD": { "Comment R": {} }, "Issue R": {} } }
        }));
        let new = tree(json!({
            "Audit": { "Admin RUD": { "Assessment R": { "Evidence R": {} }, "Issue R": {} } }
        }));
        let delta = diff(&old, &new).unwrap();

        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].key, RoleKey::new("Evidence", "Admin*Audit*Assessment"));

        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].key, RoleKey::new("Comment", "Admin*Audit*Assessment"));

        assert_eq!(delta.changed.len(), 1);
        assert_eq!(delta.changed[0].key, RoleKey::new("Assessment", "Admin*Audit"));
        assert_eq!(delta.changed[0].permissions, Permissions::READ);
    }

    #[test]
    fn test_diff_orders_for_application() {
        let old = tree(json!({}));
        let new = tree(json!({"Audit": {"Admin RUD": {"Assessment RUD": {"Comment R": {}}}}}));

        let forward = diff(&old, &new).unwrap();
        let names: Vec<_> = forward.added.iter().map(|s| s.key.name.as_str()).collect();
        assert_eq!(names, vec!["Admin", "Admin*Audit", "Admin*Audit*Assessment"]);

        let backward = diff(&new, &old).unwrap();
        let names: Vec<_> = backward.removed.iter().map(|s| s.key.name.as_str()).collect();
        assert_eq!(names, vec!["Admin*Audit*Assessment", "Admin*Audit", "Admin"]);
    }

    #[test]
    fn test_registry_with_extra_role_does_not_match() {
        use crate::acl::types::{Role, RootRole};

        let registry = RoleRegistry::from_roles(vec![
            Role::Root(RootRole {
                id: 1,
                object_type: "Audit".into(),
                name: "Admin".into(),
                permissions: Permissions::RUD,
            }),
            Role::Root(RootRole {
                id: 2,
                object_type: "Audit".into(),
                name: "Auditors".into(),
                permissions: Permissions::READ,
            }),
        ]);
        let admin_only = tree(json!({"Audit": {"Admin RUD": {}}})).flatten().unwrap();
        let both = tree(json!({"Audit": {"Admin RUD": {}, "Auditors R": {}}}))
            .flatten()
            .unwrap();

        assert!(registry_matches(&registry, &both).is_ok());
        let why = registry_matches(&registry, &admin_only).unwrap_err();
        assert!(why.contains("Auditors"), "{why}");
    }

    #[test]
    fn test_diff_rejects_invalid_tree() {
        let old = tree(json!({}));
        let new = tree(json!({"Audit": {"Admin RUD": {"Assessment RUD": {}, "Assessment R": {}}}}));
        assert!(matches!(diff(&old, &new), Err(AclError::InvalidRuleTree(_))));
    }
}
