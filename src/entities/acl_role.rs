use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "acl_roles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub object_type: String,
    pub name: String,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub internal: bool,
    pub parent_role_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentRoleId",
        to = "Column::Id",
        on_delete = "Cascade"
    )]
    Parent,
}

impl ActiveModelBehavior for ActiveModel {}
