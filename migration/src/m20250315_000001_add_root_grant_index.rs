use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // A root grant's base is its own id, so idx_acl_grants_unique never
        // collides for two roots. Partial indexes are not expressible through
        // the index builder; SQLite and Postgres share this syntax.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_acl_grants_root \
                 ON acl_grants (person_id, role_id, object_type, object_id) \
                 WHERE parent_grant_id IS NULL",
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .if_exists()
                    .name("idx_acl_grants_root")
                    .table(AclGrants::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum AclGrants {
    Table,
}
