use std::collections::{BTreeSet, HashSet, VecDeque};

use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait,
};

use crate::acl::errors::AclError;
use crate::acl::grants;
use crate::acl::registry::{self, RoleRegistry};
use crate::acl::types::{
    DerivedRole, Edge, Grant, ObjectRef, Permission, Permissions, RootRole, RELATIONSHIP_TYPE,
};
use crate::entities::{acl_grant, acl_role, mapping};
use crate::settings::{Propagation, Snapshots};

/// Keeps the grant store consistent with the role registry and the mapping graph.
///
/// Every public operation runs in its own transaction (a savepoint when `db`
/// is already a transaction), so callers never observe a half-propagated state.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pub(crate) propagation: Propagation,
    pub(crate) snapshots: Snapshots,
}

impl Engine {
    pub fn new(propagation: Propagation, snapshots: Snapshots) -> Self {
        Self {
            propagation,
            snapshots,
        }
    }

    /// Assign `role` to a person on `object` and propagate it across the graph.
    pub async fn grant_base_role<C: TransactionTrait>(
        &self,
        db: &C,
        person_id: i32,
        role: &RootRole,
        object: &ObjectRef,
    ) -> Result<Grant, AclError> {
        if role.object_type != object.object_type {
            return Err(AclError::InvalidGrantOperation(format!(
                "role `{}` applies to `{}`, not {object}",
                role.name, role.object_type
            )));
        }

        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;
        let root = match grants::find_root(&txn, person_id, role.id, object).await? {
            Some(existing) => existing,
            None => match grants::insert_root(&txn, person_id, role.id, object).await {
                Ok(inserted) => inserted,
                Err(e) if grants::is_unique_violation(&e) => {
                    tracing::debug!(person_id, %object, "Root grant stored concurrently");
                    grants::find_root(&txn, person_id, role.id, object)
                        .await?
                        .ok_or_else(|| AclError::NotFound(format!("root grant on {object}")))?
                }
                Err(e) => return Err(e),
            },
        };

        let mut walk = Walk::new(&txn, &registry, self.propagation.max_depth);
        walk.run(root.clone(), None).await?;
        let derived = walk.into_created().len();
        txn.commit().await?;

        tracing::info!(
            grant_id = root.id,
            person_id,
            role = %role.name,
            %object,
            derived,
            "Granted base role"
        );
        Ok(root)
    }

    /// Same as [`Engine::grant_base_role`], resolving the role by id. Propagated
    /// roles are rejected before anything is written.
    pub async fn grant_base_role_by_id<C: TransactionTrait>(
        &self,
        db: &C,
        person_id: i32,
        role_id: i32,
        object: &ObjectRef,
    ) -> Result<Grant, AclError> {
        let txn = db.begin().await?;
        let role = registry::root_role(&txn, role_id).await?;
        let grant = self.grant_base_role(&txn, person_id, &role, object).await?;
        txn.commit().await?;
        Ok(grant)
    }

    /// Remove a root grant and its whole propagation chain.
    pub async fn revoke_base_role<C: TransactionTrait>(
        &self,
        db: &C,
        grant_id: i32,
    ) -> Result<u64, AclError> {
        let txn = db.begin().await?;
        let grant = grants::get(&txn, grant_id)
            .await?
            .ok_or_else(|| AclError::NotFound(format!("grant {grant_id}")))?;
        if !grant.is_root() {
            return Err(AclError::InvalidGrantOperation(format!(
                "grant {grant_id} is derived; remove the mapping that produced it instead"
            )));
        }
        let deleted = grants::delete_chain(&txn, grant.base_grant_id).await?;
        txn.commit().await?;

        tracing::info!(grant_id, person_id = grant.person_id, object = %grant.object, deleted, "Revoked base role");
        Ok(deleted)
    }

    /// Propagate an existing grant across every mapping currently in place.
    /// Returns the grants this call created.
    pub async fn expand<C: TransactionTrait>(
        &self,
        db: &C,
        grant_id: i32,
    ) -> Result<Vec<Grant>, AclError> {
        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;
        let grant = grants::get(&txn, grant_id)
            .await?
            .ok_or_else(|| AclError::NotFound(format!("grant {grant_id}")))?;

        let mut walk = Walk::new(&txn, &registry, self.propagation.max_depth);
        walk.run(grant, None).await?;
        let created = walk.into_created();
        txn.commit().await?;
        Ok(created)
    }

    /// Let existing access flow across a newly created mapping.
    pub async fn on_edge_created<C: TransactionTrait>(
        &self,
        db: &C,
        edge: &Edge,
    ) -> Result<Vec<Grant>, AclError> {
        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;
        let mut walk = Walk::new(&txn, &registry, self.propagation.max_depth);

        let mut ends = vec![&edge.source];
        if edge.destination != edge.source {
            ends.push(&edge.destination);
        }
        for end in ends {
            for grant in grants::for_object(&txn, end).await? {
                if registry.has_children(grant.role_id) {
                    walk.run(grant, Some(edge)).await?;
                }
            }
        }
        let created = walk.into_created();
        txn.commit().await?;

        tracing::info!(
            mapping_id = edge.id,
            source = %edge.source,
            destination = %edge.destination,
            created = created.len(),
            "Propagated across new mapping"
        );
        Ok(created)
    }

    /// Remove the grants derived through a mapping. Call after the mapping row
    /// is gone; grants still derivable through other mappings are restored.
    pub async fn on_edge_deleted<C: TransactionTrait>(
        &self,
        db: &C,
        edge: &Edge,
    ) -> Result<u64, AclError> {
        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;

        let mut doomed = grants::derived_across(&txn, &edge.source, &edge.destination).await?;
        doomed.extend(grants::derived_across(&txn, &edge.destination, &edge.source).await?);
        doomed.extend(
            grants::for_object(&txn, &ObjectRef::relationship(edge.id))
                .await?
                .into_iter()
                .map(|g| g.id),
        );

        let removed = grants::delete_cascade(&txn, &doomed).await?;
        let restored = self.heal(&txn, &registry, &removed).await?;
        txn.commit().await?;

        let net = removed.len().saturating_sub(restored) as u64;
        tracing::info!(
            mapping_id = edge.id,
            source = %edge.source,
            destination = %edge.destination,
            removed = removed.len(),
            restored,
            "Removed access derived through mapping"
        );
        Ok(net)
    }

    /// Drop every grant on a deleted object. Call after its mappings are gone.
    pub async fn on_object_deleted<C: TransactionTrait>(
        &self,
        db: &C,
        object: &ObjectRef,
    ) -> Result<u64, AclError> {
        let txn = db.begin().await?;
        let registry = RoleRegistry::load(&txn).await?;
        let ids: Vec<i32> = grants::for_object(&txn, object)
            .await?
            .iter()
            .map(|g| g.id)
            .collect();
        let removed = grants::delete_cascade(&txn, &ids).await?;
        let restored = self.heal(&txn, &registry, &removed).await?;
        txn.commit().await?;

        tracing::info!(%object, removed = removed.len(), restored, "Removed grants of deleted object");
        Ok(removed.len().saturating_sub(restored) as u64)
    }

    /// Re-expand the surviving roots of chains that lost grants, restoring
    /// whatever is still derivable through the remaining graph.
    async fn heal<C: ConnectionTrait>(
        &self,
        db: &C,
        registry: &RoleRegistry,
        removed: &[Grant],
    ) -> Result<usize, AclError> {
        let gone: HashSet<i32> = removed.iter().map(|g| g.id).collect();
        let bases: BTreeSet<i32> = removed
            .iter()
            .map(|g| g.base_grant_id)
            .filter(|b| !gone.contains(b))
            .collect();

        let mut walk = Walk::new(db, registry, self.propagation.max_depth);
        for base in bases {
            if let Some(root) = grants::get(db, base).await? {
                walk.run(root, None).await?;
            }
        }
        Ok(walk.into_created().len())
    }
}

/// Whether `person_id` holds `permission` on `object` through any grant.
pub async fn check<C: ConnectionTrait>(
    db: &C,
    person_id: i32,
    object: &ObjectRef,
    permission: Permission,
) -> Result<bool, AclError> {
    let rows = acl_grant::Entity::find()
        .filter(acl_grant::Column::PersonId.eq(person_id))
        .filter(acl_grant::Column::ObjectType.eq(object.object_type.as_str()))
        .filter(acl_grant::Column::ObjectId.eq(object.object_id))
        .find_also_related(acl_role::Entity)
        .all(db)
        .await?;

    Ok(rows.into_iter().filter_map(|(_, role)| role).any(|role| {
        Permissions {
            read: role.can_read,
            update: role.can_update,
            delete: role.can_delete,
        }
        .allows(permission)
    }))
}

/// Mappings incident to `object`. A `Relationship` record is incident only
/// to its own mapping.
pub(crate) async fn edges_touching<C: ConnectionTrait>(
    db: &C,
    object: &ObjectRef,
) -> Result<Vec<Edge>, AclError> {
    use mapping::Column;

    if object.is_relationship() {
        let edge = mapping::Entity::find_by_id(object.object_id).one(db).await?;
        return Ok(edge.map(Edge::from).into_iter().collect());
    }

    let models = mapping::Entity::find()
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(Column::SourceType.eq(object.object_type.as_str()))
                        .add(Column::SourceId.eq(object.object_id)),
                )
                .add(
                    Condition::all()
                        .add(Column::DestinationType.eq(object.object_type.as_str()))
                        .add(Column::DestinationId.eq(object.object_id)),
                ),
        )
        .all(db)
        .await?;
    Ok(models.into_iter().map(Edge::from).collect())
}

/// Objects a grant of `child` lands on when a grant on `from` crosses `edge`.
pub(crate) fn hop_targets(from: &ObjectRef, child: &DerivedRole, edge: &Edge) -> Vec<ObjectRef> {
    if from.is_relationship() {
        if from.object_id != edge.id {
            return Vec::new();
        }
        let mut ends: Vec<ObjectRef> = Vec::new();
        for end in [&edge.source, &edge.destination] {
            if end.object_type == child.object_type && !ends.contains(end) {
                ends.push(end.clone());
            }
        }
        return ends;
    }

    if child.object_type == RELATIONSHIP_TYPE {
        return if edge.touches(from) {
            vec![ObjectRef::relationship(edge.id)]
        } else {
            Vec::new()
        };
    }

    match edge.far_side(from) {
        Some(far) if far.object_type == child.object_type => vec![far.clone()],
        _ => Vec::new(),
    }
}

/// Breadth-first propagation from seed grants. Each hop descends one level
/// of the role tree, so a walk ends once the seed's subtree is exhausted.
pub(crate) struct Walk<'a, C> {
    db: &'a C,
    registry: &'a RoleRegistry,
    max_depth: usize,
    created: Vec<Grant>,
}

impl<'a, C: ConnectionTrait> Walk<'a, C> {
    pub(crate) fn new(db: &'a C, registry: &'a RoleRegistry, max_depth: usize) -> Self {
        Self {
            db,
            registry,
            max_depth,
            created: Vec::new(),
        }
    }

    /// Grants this walk inserted, in creation order.
    pub(crate) fn into_created(self) -> Vec<Grant> {
        self.created
    }

    /// Walk from `seed`. With `first_hop`, the seed only crosses that mapping;
    /// grants it produces then spread over the whole graph.
    pub(crate) async fn run(&mut self, seed: Grant, first_hop: Option<&Edge>) -> Result<(), AclError> {
        let registry = self.registry;
        let mut visited: HashSet<(i32, ObjectRef)> = HashSet::new();
        visited.insert((seed.role_id, seed.object.clone()));

        let mut queue = VecDeque::from([(seed, 0usize)]);
        while let Some((grant, depth)) = queue.pop_front() {
            let children = registry.children(grant.role_id);
            if children.is_empty() {
                continue;
            }
            if depth >= self.max_depth {
                tracing::error!(
                    role_id = grant.role_id,
                    object = %grant.object,
                    depth,
                    "Propagation exceeded maximum depth"
                );
                return Err(AclError::CycleDepthExceeded {
                    role_id: grant.role_id,
                    object: grant.object,
                    depth,
                });
            }

            let edges = match first_hop {
                Some(edge) if depth == 0 => vec![edge.clone()],
                _ => edges_touching(self.db, &grant.object).await?,
            };

            for edge in &edges {
                for child in children {
                    for target in hop_targets(&grant.object, child, edge) {
                        if !visited.insert((child.id, target.clone())) {
                            continue;
                        }
                        let (derived, created) =
                            grants::insert_derived(self.db, &grant, child.id, &target).await?;
                        if created {
                            tracing::trace!(
                                grant_id = derived.id,
                                role_id = child.id,
                                object = %target,
                                "Derived grant"
                            );
                            self.created.push(derived.clone());
                        }
                        queue.push_back((derived, depth + 1));
                    }
                }
            }
        }
        Ok(())
    }
}
