use sea_orm_migration::prelude::*;

mod m20261018_000001_create_identities;
mod m20261018_000002_create_identity_addresses;
mod m20261018_000003_create_selfservice_flows;
mod m20261018_000004_create_code_tables;
mod m20261018_000005_create_outbox_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_create_identities::Migration),
            Box::new(m20261018_000002_create_identity_addresses::Migration),
            Box::new(m20261018_000003_create_selfservice_flows::Migration),
            Box::new(m20261018_000004_create_code_tables::Migration),
            Box::new(m20261018_000005_create_outbox_events::Migration),
        ]
    }
}
