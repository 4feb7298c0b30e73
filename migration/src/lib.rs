pub use sea_orm_migration::prelude::*;

mod m20250301_000001_initial_acl_schema;
mod m20250301_000002_add_mappings;
mod m20250310_000001_add_rule_versions;
mod m20250315_000001_add_root_grant_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_initial_acl_schema::Migration),
            Box::new(m20250301_000002_add_mappings::Migration),
            Box::new(m20250310_000001_add_rule_versions::Migration),
            Box::new(m20250315_000001_add_root_grant_index::Migration),
        ]
    }
}
