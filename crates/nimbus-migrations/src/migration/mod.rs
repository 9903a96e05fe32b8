use sea_orm_migration::prelude::*;

mod m20260115_000001_initial_schema;
mod m20260301_000001_add_function_timeout;
mod m20260412_000001_add_api_key_last_used;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260115_000001_initial_schema::Migration),
            Box::new(m20260301_000001_add_function_timeout::Migration),
            Box::new(m20260412_000001_add_api_key_last_used::Migration),
        ]
    }
}
