use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "acl_grants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub person_id: i32,
    pub role_id: i32,
    pub object_type: String,
    pub object_id: i32,
    pub parent_grant_id: Option<i32>,
    /// Only null between the insert and the self-update of a root grant.
    pub base_grant_id: Option<i32>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::acl_role::Entity",
        from = "Column::RoleId",
        to = "super::acl_role::Column::Id",
        on_delete = "Cascade"
    )]
    Role,
}

impl Related<super::acl_role::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Role.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
