use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SelfserviceFlows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SelfserviceFlows::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SelfserviceFlows::Nid).uuid().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::Kind).string().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::FlowType).string().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::State).string().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::CsrfToken).string().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::RequestUrl).string().not_null())
                    .col(ColumnDef::new(SelfserviceFlows::ReturnTo).string())
                    .col(ColumnDef::new(SelfserviceFlows::Ui).json_binary().not_null())
                    .col(
                        ColumnDef::new(SelfserviceFlows::SubmitCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SelfserviceFlows::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SelfserviceFlows::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SelfserviceFlows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SelfserviceFlows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Expiry sweep scans by network + expires_at.
        manager
            .create_index(
                Index::create()
                    .table(SelfserviceFlows::Table)
                    .col(SelfserviceFlows::Nid)
                    .col(SelfserviceFlows::ExpiresAt)
                    .name("idx_selfservice_flows_nid_expires_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SelfserviceFlows::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SelfserviceFlows {
    Table,
    Id,
    Nid,
    Kind,
    FlowType,
    State,
    CsrfToken,
    RequestUrl,
    ReturnTo,
    Ui,
    SubmitCount,
    IssuedAt,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
