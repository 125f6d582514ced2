pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_plugins;
mod m20250101_000002_create_plugin_versions;
mod m20250101_000003_create_plugin_builds;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_plugins::Migration),
            Box::new(m20250101_000002_create_plugin_versions::Migration),
            Box::new(m20250101_000003_create_plugin_builds::Migration),
        ]
    }
}
