use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdentityAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdentityAddresses::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(IdentityAddresses::Nid).uuid().not_null())
                    .col(
                        ColumnDef::new(IdentityAddresses::IdentityId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IdentityAddresses::Kind).string().not_null())
                    .col(ColumnDef::new(IdentityAddresses::Via).string().not_null())
                    .col(ColumnDef::new(IdentityAddresses::Value).string().not_null())
                    .col(
                        ColumnDef::new(IdentityAddresses::Verified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(IdentityAddresses::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(IdentityAddresses::VerifiedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(IdentityAddresses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IdentityAddresses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(IdentityAddresses::Table, IdentityAddresses::IdentityId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One address value per (network, kind, channel).
        manager
            .create_index(
                Index::create()
                    .table(IdentityAddresses::Table)
                    .col(IdentityAddresses::Nid)
                    .col(IdentityAddresses::Kind)
                    .col(IdentityAddresses::Via)
                    .col(IdentityAddresses::Value)
                    .unique()
                    .name("uq_identity_addresses_nid_kind_via_value")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(IdentityAddresses::Table)
                    .col(IdentityAddresses::IdentityId)
                    .name("idx_identity_addresses_identity_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdentityAddresses::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IdentityAddresses {
    Table,
    Id,
    Nid,
    IdentityId,
    Kind,
    Via,
    Value,
    Verified,
    Status,
    VerifiedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Identities {
    Table,
    Id,
}
