use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Role registry: one row per (object_type, name)
        manager
            .create_table(
                Table::create()
                    .table(AclRoles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AclRoles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(AclRoles::ObjectType))
                    .col(string(AclRoles::Name))
                    .col(boolean(AclRoles::CanRead))
                    .col(boolean(AclRoles::CanUpdate))
                    .col(boolean(AclRoles::CanDelete))
                    .col(
                        ColumnDef::new(AclRoles::Internal)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(integer_null(AclRoles::ParentRoleId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_acl_roles_parent")
                            .from(AclRoles::Table, AclRoles::ParentRoleId)
                            .to(AclRoles::Table, AclRoles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_roles_type_name")
                    .table(AclRoles::Table)
                    .col(AclRoles::ObjectType)
                    .col(AclRoles::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_roles_parent")
                    .table(AclRoles::Table)
                    .col(AclRoles::ParentRoleId)
                    .to_owned(),
            )
            .await?;

        // Grant store: root grants point at themselves through base_grant_id
        manager
            .create_table(
                Table::create()
                    .table(AclGrants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AclGrants::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(integer(AclGrants::PersonId))
                    .col(integer(AclGrants::RoleId))
                    .col(string(AclGrants::ObjectType))
                    .col(integer(AclGrants::ObjectId))
                    .col(integer_null(AclGrants::ParentGrantId))
                    .col(integer_null(AclGrants::BaseGrantId))
                    .col(big_integer(AclGrants::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_acl_grants_role")
                            .from(AclGrants::Table, AclGrants::RoleId)
                            .to(AclRoles::Table, AclRoles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_acl_grants_parent")
                            .from(AclGrants::Table, AclGrants::ParentGrantId)
                            .to(AclGrants::Table, AclGrants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_acl_grants_base")
                            .from(AclGrants::Table, AclGrants::BaseGrantId)
                            .to(AclGrants::Table, AclGrants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Concurrent propagation across the same edge collides here and is ignored
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_grants_unique")
                    .table(AclGrants::Table)
                    .col(AclGrants::PersonId)
                    .col(AclGrants::RoleId)
                    .col(AclGrants::ObjectType)
                    .col(AclGrants::ObjectId)
                    .col(AclGrants::BaseGrantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_grants_object")
                    .table(AclGrants::Table)
                    .col(AclGrants::ObjectType)
                    .col(AclGrants::ObjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_grants_parent")
                    .table(AclGrants::Table)
                    .col(AclGrants::ParentGrantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_acl_grants_base")
                    .table(AclGrants::Table)
                    .col(AclGrants::BaseGrantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AclGrants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AclRoles::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum AclRoles {
    Table,
    Id,
    ObjectType,
    Name,
    CanRead,
    CanUpdate,
    CanDelete,
    Internal,
    ParentRoleId,
}

#[derive(DeriveIden)]
enum AclGrants {
    Table,
    Id,
    PersonId,
    RoleId,
    ObjectType,
    ObjectId,
    ParentGrantId,
    BaseGrantId,
    CreatedAt,
}
