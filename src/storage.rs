use crate::acl::engine::{self, Engine};
use crate::acl::errors::AclError;
use crate::acl::types::{Edge, ObjectRef};
use crate::entities::mapping;
use crate::errors::AppError;
use crate::settings::Database as DbCfg;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AppError> {
    let db = Database::connect(&cfg.url).await?;
    Migrator::up(&db, None).await?;
    tracing::info!(url = %cfg.url, "Database ready");
    Ok(db)
}

pub async fn get_mapping(db: &DatabaseConnection, id: i32) -> Result<Option<Edge>, AclError> {
    Ok(mapping::Entity::find_by_id(id).one(db).await?.map(Edge::from))
}

/// Mappings with `object` on either end.
pub async fn mappings_for(
    db: &DatabaseConnection,
    object: &ObjectRef,
) -> Result<Vec<Edge>, AclError> {
    engine::edges_touching(db, object).await
}

/// Record a mapping and propagate access across it in the same transaction.
/// Recording an existing mapping again returns it unchanged.
pub async fn create_mapping(
    db: &DatabaseConnection,
    engine: &Engine,
    source: &ObjectRef,
    destination: &ObjectRef,
) -> Result<Edge, AclError> {
    if source.is_relationship() || destination.is_relationship() {
        return Err(AclError::InvalidObjectRef(format!(
            "{source} -> {destination}: relationship records cannot be mapped"
        )));
    }

    let txn = db.begin().await?;
    let existing = mapping::Entity::find()
        .filter(mapping::Column::SourceType.eq(source.object_type.as_str()))
        .filter(mapping::Column::SourceId.eq(source.object_id))
        .filter(mapping::Column::DestinationType.eq(destination.object_type.as_str()))
        .filter(mapping::Column::DestinationId.eq(destination.object_id))
        .one(&txn)
        .await?;
    if let Some(model) = existing {
        txn.commit().await?;
        return Ok(Edge::from(model));
    }

    let model = mapping::ActiveModel {
        source_type: Set(source.object_type.clone()),
        source_id: Set(source.object_id),
        destination_type: Set(destination.object_type.clone()),
        destination_id: Set(destination.object_id),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let edge = Edge::from(model);
    engine.on_edge_created(&txn, &edge).await?;
    txn.commit().await?;
    Ok(edge)
}

/// Delete a mapping and the access that flowed through it. Returns the net
/// number of grants removed.
pub async fn delete_mapping(
    db: &DatabaseConnection,
    engine: &Engine,
    id: i32,
) -> Result<u64, AclError> {
    let txn = db.begin().await?;
    let model = mapping::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AclError::NotFound(format!("mapping {id}")))?;
    let edge = Edge::from(model.clone());
    model.delete(&txn).await?;

    let removed = engine.on_edge_deleted(&txn, &edge).await?;
    txn.commit().await?;
    Ok(removed)
}

/// Forget an object: its mappings go first, then whatever grants remain on it.
pub async fn delete_object(
    db: &DatabaseConnection,
    engine: &Engine,
    object: &ObjectRef,
) -> Result<u64, AclError> {
    let txn = db.begin().await?;
    let mut removed = 0;
    for edge in engine::edges_touching(&txn, object).await? {
        mapping::Entity::delete_by_id(edge.id).exec(&txn).await?;
        removed += engine.on_edge_deleted(&txn, &edge).await?;
    }
    removed += engine.on_object_deleted(&txn, object).await?;
    txn.commit().await?;
    Ok(removed)
}
