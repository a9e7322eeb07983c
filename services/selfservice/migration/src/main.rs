use sea_orm_migration::prelude::*;

use tessera_selfservice_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
