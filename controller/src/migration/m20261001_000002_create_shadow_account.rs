use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

use super::m20261001_000001_init::{Customer, Router};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 shadow_account 表（设备账号影子记录）
        manager
            .create_table(
                Table::create()
                    .table(ShadowAccount::Table)
                    .if_not_exists()
                    .col(big_integer(ShadowAccount::Id).auto_increment().primary_key())
                    .col(big_integer(ShadowAccount::CustomerId))
                    .col(big_integer(ShadowAccount::RouterId))
                    .col(string(ShadowAccount::ServiceType))
                    .col(string(ShadowAccount::Username))
                    .col(string(ShadowAccount::Password))
                    .col(string(ShadowAccount::Profile))
                    .col(string_null(ShadowAccount::MacAddress))
                    .col(string(ShadowAccount::Status).default("enabled"))
                    .col(boolean(ShadowAccount::SyncedToRouter).default(false))
                    .col(timestamp_null(ShadowAccount::LastSync))
                    .col(timestamp(ShadowAccount::CreatedAt))
                    .col(timestamp(ShadowAccount::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_shadow_account_customer")
                            .from(ShadowAccount::Table, ShadowAccount::CustomerId)
                            .to(Customer::Table, Customer::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_shadow_account_router")
                            .from(ShadowAccount::Table, ShadowAccount::RouterId)
                            .to(Router::Table, Router::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_shadow_account_unique")
                    .table(ShadowAccount::Table)
                    .col(ShadowAccount::CustomerId)
                    .col(ShadowAccount::ServiceType)
                    .col(ShadowAccount::RouterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ShadowAccount::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ShadowAccount {
    Table,
    Id,
    CustomerId,
    RouterId,
    ServiceType,
    Username,
    Password,
    Profile,
    MacAddress,
    Status,
    SyncedToRouter,
    LastSync,
    CreatedAt,
    UpdatedAt,
}
