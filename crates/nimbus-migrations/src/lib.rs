//! Database migrations for the Nimbus platform

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;
