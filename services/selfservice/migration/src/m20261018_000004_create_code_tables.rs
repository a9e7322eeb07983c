use sea_orm_migration::prelude::*;

/// Recovery and verification codes live in separate tables with identical layout.
const CODE_TABLES: [&str; 2] = ["recovery_codes", "verification_codes"];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in CODE_TABLES {
            let table = Alias::new(name);
            manager
                .create_table(
                    Table::create()
                        .table(table.clone())
                        .if_not_exists()
                        .col(ColumnDef::new(Codes::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Codes::Nid).uuid().not_null())
                        .col(ColumnDef::new(Codes::FlowId).uuid().not_null())
                        .col(ColumnDef::new(Codes::IdentityId).uuid().not_null())
                        .col(ColumnDef::new(Codes::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Codes::CodeHmac).string().not_null())
                        .col(
                            ColumnDef::new(Codes::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Codes::UsedAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Codes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        // Codes die with their flow.
                        .foreign_key(
                            ForeignKey::create()
                                .from(table.clone(), Codes::FlowId)
                                .to(SelfserviceFlows::Table, SelfserviceFlows::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .from(table.clone(), Codes::AddressId)
                                .to(IdentityAddresses::Table, IdentityAddresses::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .table(table)
                        .col(Codes::Nid)
                        .col(Codes::FlowId)
                        .name(format!("idx_{name}_nid_flow_id"))
                        .to_owned(),
                )
                .await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in CODE_TABLES {
            manager
                .drop_table(Table::drop().table(Alias::new(name)).to_owned())
                .await?;
        }
        Ok(())
    }
}

#[derive(Iden)]
enum Codes {
    Id,
    Nid,
    FlowId,
    IdentityId,
    AddressId,
    CodeHmac,
    ExpiresAt,
    UsedAt,
    CreatedAt,
}

#[derive(Iden)]
enum SelfserviceFlows {
    Table,
    Id,
}

#[derive(Iden)]
enum IdentityAddresses {
    Table,
    Id,
}
