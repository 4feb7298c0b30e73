use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Applied rule-tree migrations, by name
        manager
            .create_table(
                Table::create()
                    .table(AclRuleVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AclRuleVersions::Name)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(big_integer(AclRuleVersions::AppliedAt))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AclRuleVersions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AclRuleVersions {
    Table,
    Name,
    AppliedAt,
}
