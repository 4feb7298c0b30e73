//! Grant store: instantiated (person, role, object) rows and their derivation links.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};

use crate::acl::errors::AclError;
use crate::acl::types::{Grant, ObjectRef};
use crate::entities::acl_grant::{self, Column, Entity};

/// Upper bound on ids bound into a single `IN (...)` list.
const MAX_IN_LIST: usize = 500;

/// Columns of the uniqueness constraint; a conflicting insert is a no-op.
fn unique_key() -> OnConflict {
    OnConflict::columns([
        Column::PersonId,
        Column::RoleId,
        Column::ObjectType,
        Column::ObjectId,
        Column::BaseGrantId,
    ])
    .do_nothing()
    .to_owned()
}

fn on_object(object: &ObjectRef) -> Condition {
    Condition::all()
        .add(Column::ObjectType.eq(object.object_type.as_str()))
        .add(Column::ObjectId.eq(object.object_id))
}

pub async fn get<C: ConnectionTrait>(db: &C, id: i32) -> Result<Option<Grant>, AclError> {
    Ok(Entity::find_by_id(id).one(db).await?.map(Grant::from))
}

pub async fn for_object<C: ConnectionTrait>(
    db: &C,
    object: &ObjectRef,
) -> Result<Vec<Grant>, AclError> {
    let models = Entity::find()
        .filter(on_object(object))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(Grant::from).collect())
}

pub async fn for_person<C: ConnectionTrait>(
    db: &C,
    person_id: i32,
) -> Result<Vec<Grant>, AclError> {
    let models = Entity::find()
        .filter(Column::PersonId.eq(person_id))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(Grant::from).collect())
}

pub async fn all<C: ConnectionTrait>(db: &C) -> Result<Vec<Grant>, AclError> {
    let models = Entity::find().order_by_asc(Column::Id).all(db).await?;
    Ok(models.into_iter().map(Grant::from).collect())
}

/// Grants holding any of `role_ids`.
pub async fn with_roles<C: ConnectionTrait>(
    db: &C,
    role_ids: &[i32],
) -> Result<Vec<Grant>, AclError> {
    let mut out = Vec::new();
    for chunk in role_ids.chunks(MAX_IN_LIST) {
        let models = Entity::find()
            .filter(Column::RoleId.is_in(chunk.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await?;
        out.extend(models.into_iter().map(Grant::from));
    }
    Ok(out)
}

/// Grants on objects of `object_type` with the given ids, restricted to `role_ids`.
pub async fn on_objects_with_roles<C: ConnectionTrait>(
    db: &C,
    object_type: &str,
    object_ids: &[i32],
    role_ids: &[i32],
) -> Result<Vec<Grant>, AclError> {
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for chunk in object_ids.chunks(MAX_IN_LIST) {
        let models = Entity::find()
            .filter(Column::ObjectType.eq(object_type))
            .filter(Column::ObjectId.is_in(chunk.iter().copied()))
            .filter(Column::RoleId.is_in(role_ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await?;
        out.extend(models.into_iter().map(Grant::from));
    }
    Ok(out)
}

pub async fn find_root<C: ConnectionTrait>(
    db: &C,
    person_id: i32,
    role_id: i32,
    object: &ObjectRef,
) -> Result<Option<Grant>, AclError> {
    let model = Entity::find()
        .filter(Column::PersonId.eq(person_id))
        .filter(Column::RoleId.eq(role_id))
        .filter(on_object(object))
        .filter(Column::ParentGrantId.is_null())
        .one(db)
        .await?;
    Ok(model.map(Grant::from))
}

/// Insert a root grant and point its `base_grant_id` at itself.
///
/// Runs in a savepoint: a concurrent insert of the same root trips the
/// root-grant unique index and leaves the caller's transaction usable.
pub async fn insert_root<C: TransactionTrait>(
    db: &C,
    person_id: i32,
    role_id: i32,
    object: &ObjectRef,
) -> Result<Grant, AclError> {
    let sp = db.begin().await?;
    let model = acl_grant::ActiveModel {
        person_id: Set(person_id),
        role_id: Set(role_id),
        object_type: Set(object.object_type.clone()),
        object_id: Set(object.object_id),
        parent_grant_id: Set(None),
        base_grant_id: Set(None),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    }
    .insert(&sp)
    .await?;

    let id = model.id;
    let mut active: acl_grant::ActiveModel = model.into();
    active.base_grant_id = Set(Some(id));
    let root = active.update(&sp).await?;
    sp.commit().await?;
    Ok(root.into())
}

/// The error is a unique-index violation, i.e. another writer stored the row first.
pub fn is_unique_violation(err: &AclError) -> bool {
    matches!(
        err,
        AclError::Db(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    )
}

/// Insert the grant `parent` produces for `role_id` on `target`. Returns the
/// stored row and whether this call created it; an equal grant inserted
/// earlier (or by a concurrent transaction) is returned as-is.
pub async fn insert_derived<C: ConnectionTrait>(
    db: &C,
    parent: &Grant,
    role_id: i32,
    target: &ObjectRef,
) -> Result<(Grant, bool), AclError> {
    let row = acl_grant::ActiveModel {
        person_id: Set(parent.person_id),
        role_id: Set(role_id),
        object_type: Set(target.object_type.clone()),
        object_id: Set(target.object_id),
        parent_grant_id: Set(Some(parent.id)),
        base_grant_id: Set(Some(parent.base_grant_id)),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };
    let inserted = Entity::insert(row)
        .on_conflict(unique_key())
        .exec_without_returning(db)
        .await?;

    let stored = Entity::find()
        .filter(Column::PersonId.eq(parent.person_id))
        .filter(Column::RoleId.eq(role_id))
        .filter(on_object(target))
        .filter(Column::BaseGrantId.eq(parent.base_grant_id))
        .one(db)
        .await?
        .ok_or_else(|| AclError::NotFound(format!("grant of role {role_id} on {target}")))?;

    Ok((stored.into(), inserted > 0))
}

/// A derived row for bulk insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedRow {
    pub person_id: i32,
    pub role_id: i32,
    pub object: ObjectRef,
    pub parent_grant_id: i32,
    pub base_grant_id: i32,
}

/// Batched insert of derived grants, skipping rows that already exist.
pub async fn insert_many_derived<C: ConnectionTrait>(
    db: &C,
    rows: &[DerivedRow],
    batch_size: usize,
) -> Result<u64, AclError> {
    let now = Utc::now().timestamp();
    let mut inserted = 0;
    for chunk in rows.chunks(batch_size.max(1)) {
        let models = chunk.iter().map(|r| acl_grant::ActiveModel {
            person_id: Set(r.person_id),
            role_id: Set(r.role_id),
            object_type: Set(r.object.object_type.clone()),
            object_id: Set(r.object.object_id),
            parent_grant_id: Set(Some(r.parent_grant_id)),
            base_grant_id: Set(Some(r.base_grant_id)),
            created_at: Set(now),
            ..Default::default()
        });
        inserted += Entity::insert_many(models)
            .on_conflict(unique_key())
            .exec_without_returning(db)
            .await?;
    }
    Ok(inserted)
}

/// `ids` plus every grant transitively derived from them.
pub async fn with_descendants<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<Vec<Grant>, AclError> {
    let mut seen: HashSet<i32> = HashSet::new();
    let mut out = Vec::new();
    for chunk in ids.chunks(MAX_IN_LIST) {
        let models = Entity::find()
            .filter(Column::Id.is_in(chunk.iter().copied()))
            .all(db)
            .await?;
        for m in models {
            if seen.insert(m.id) {
                out.push(Grant::from(m));
            }
        }
    }

    let mut frontier: Vec<i32> = out.iter().map(|g| g.id).collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for chunk in frontier.chunks(MAX_IN_LIST) {
            let models = Entity::find()
                .filter(Column::ParentGrantId.is_in(chunk.iter().copied()))
                .all(db)
                .await?;
            for m in models {
                if seen.insert(m.id) {
                    next.push(m.id);
                    out.push(Grant::from(m));
                }
            }
        }
        frontier = next;
    }
    Ok(out)
}

/// Delete `ids` and everything derived from them. Returns the deleted rows.
pub async fn delete_cascade<C: ConnectionTrait>(
    db: &C,
    ids: &[i32],
) -> Result<Vec<Grant>, AclError> {
    let doomed = with_descendants(db, ids).await?;
    let doomed_ids: Vec<i32> = doomed.iter().map(|g| g.id).collect();
    for chunk in doomed_ids.chunks(MAX_IN_LIST) {
        Entity::delete_many()
            .filter(Column::Id.is_in(chunk.iter().copied()))
            .exec(db)
            .await?;
    }
    Ok(doomed)
}

/// Delete a root grant together with its whole propagation chain. Returns
/// the number of grants removed.
pub async fn delete_chain<C: ConnectionTrait>(db: &C, base_grant_id: i32) -> Result<u64, AclError> {
    // Rows removed by FK cascades are not reported in rows_affected, so the
    // chain is collected up front.
    let chain: Vec<i32> = Entity::find()
        .filter(
            Condition::any()
                .add(Column::BaseGrantId.eq(base_grant_id))
                .add(Column::Id.eq(base_grant_id)),
        )
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.id)
        .collect();
    let removed = delete_cascade(db, &chain).await?;
    Ok(removed.len() as u64)
}

/// Grants on `child` whose parent grant sits on `parent`.
pub async fn derived_across<C: ConnectionTrait>(
    db: &C,
    parent: &ObjectRef,
    child: &ObjectRef,
) -> Result<Vec<i32>, AclError> {
    let parent_ids: Vec<i32> = for_object(db, parent).await?.iter().map(|g| g.id).collect();
    let mut out = Vec::new();
    for chunk in parent_ids.chunks(MAX_IN_LIST) {
        let models = Entity::find()
            .filter(on_object(child))
            .filter(Column::ParentGrantId.is_in(chunk.iter().copied()))
            .all(db)
            .await?;
        out.extend(models.into_iter().map(|m| m.id));
    }
    Ok(out)
}
