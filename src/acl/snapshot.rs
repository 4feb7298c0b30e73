//! Bulk grant seeding for freshly created snapshots.
//!
//! Snapshots are not walked like live objects. For each snapshot the seeder
//! copies the first propagation hop from its parent container directly: every
//! grant on the parent whose role is snapshot-eligible yields one grant of the
//! role registered below it for the snapshot type. The rows are identical to
//! what [`Engine::expand`] would write had the snapshot been mapped to its
//! parent, but go out in a few batched statements.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};

use crate::acl::engine::Engine;
use crate::acl::errors::AclError;
use crate::acl::grants::{self, DerivedRow};
use crate::acl::registry::RoleRegistry;
use crate::acl::types::{Grant, ObjectRef};

/// A newly created snapshot and the container it was taken in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPair {
    pub snapshot_id: i32,
    pub parent: ObjectRef,
}

impl Engine {
    /// Returns the number of grants inserted.
    pub async fn seed_snapshots<C: TransactionTrait>(
        &self,
        db: &C,
        pairs: &[SnapshotPair],
    ) -> Result<u64, AclError> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;
        let snapshot_type = self.snapshots.object_type.as_str();

        let mut by_parent_type: BTreeMap<&str, Vec<&SnapshotPair>> = BTreeMap::new();
        for pair in pairs {
            by_parent_type
                .entry(pair.parent.object_type.as_str())
                .or_default()
                .push(pair);
        }

        let mut rows = Vec::new();
        for (parent_type, group) in by_parent_type {
            let mapped = self.snapshot_roles(&registry, parent_type);
            if mapped.is_empty() {
                tracing::debug!(parent_type, "No snapshot-eligible roles");
                continue;
            }

            let parent_ids: Vec<i32> = group
                .iter()
                .map(|p| p.parent.object_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let role_ids: Vec<i32> = mapped.keys().copied().collect();
            let parent_grants =
                grants::on_objects_with_roles(&txn, parent_type, &parent_ids, &role_ids).await?;

            let mut on_parent: HashMap<i32, Vec<&Grant>> = HashMap::new();
            for grant in &parent_grants {
                on_parent.entry(grant.object.object_id).or_default().push(grant);
            }

            for pair in group {
                let snapshot = ObjectRef::new(snapshot_type, pair.snapshot_id);
                for grant in on_parent.get(&pair.parent.object_id).into_iter().flatten() {
                    rows.push(DerivedRow {
                        person_id: grant.person_id,
                        role_id: mapped[&grant.role_id],
                        object: snapshot.clone(),
                        parent_grant_id: grant.id,
                        base_grant_id: grant.base_grant_id,
                    });
                }
            }
        }

        let inserted =
            grants::insert_many_derived(&txn, &rows, self.propagation.batch_size).await?;
        txn.commit().await?;

        tracing::info!(
            snapshots = pairs.len(),
            candidates = rows.len(),
            inserted,
            "Seeded snapshot grants"
        );
        Ok(inserted)
    }

    /// Eligible role on `parent_type` -> its role for the snapshot type.
    fn snapshot_roles(&self, registry: &RoleRegistry, parent_type: &str) -> HashMap<i32, i32> {
        let snapshot_type = self.snapshots.object_type.as_str();
        registry
            .roles_on(parent_type)
            .filter(|role| self.snapshots.eligible_roles.iter().any(|n| n == role.name()))
            .filter_map(|role| {
                registry
                    .children(role.id())
                    .iter()
                    .find(|child| child.object_type == snapshot_type)
                    .map(|child| (role.id(), child.id))
            })
            .collect()
    }
}
