use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Mappings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(Mappings::SourceType))
                    .col(integer(Mappings::SourceId))
                    .col(string(Mappings::DestinationType))
                    .col(integer(Mappings::DestinationId))
                    .col(big_integer(Mappings::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_mappings_endpoints")
                    .table(Mappings::Table)
                    .col(Mappings::SourceType)
                    .col(Mappings::SourceId)
                    .col(Mappings::DestinationType)
                    .col(Mappings::DestinationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Lookups from the destination side
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_mappings_destination")
                    .table(Mappings::Table)
                    .col(Mappings::DestinationType)
                    .col(Mappings::DestinationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Mappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Mappings {
    Table,
    Id,
    SourceType,
    SourceId,
    DestinationType,
    DestinationId,
    CreatedAt,
}
