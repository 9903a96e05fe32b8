use sea_orm_migration::prelude::*;

/// Per-function invocation deadline, previously a platform-wide setting.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("functions"))
                    .add_column(
                        ColumnDef::new(Alias::new("timeout_ms"))
                            .big_integer()
                            .not_null()
                            .default(5000),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Alias::new("functions"))
                    .drop_column(Alias::new("timeout_ms"))
                    .to_owned(),
            )
            .await
    }
}
