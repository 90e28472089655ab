use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

use super::m20261001_000001_init::{Customer, Router, Subscription};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 在线会话
        manager
            .create_table(
                Table::create()
                    .table(ActiveSession::Table)
                    .if_not_exists()
                    .col(big_integer(ActiveSession::Id).auto_increment().primary_key())
                    .col(big_integer(ActiveSession::RouterId))
                    .col(big_integer(ActiveSession::CustomerId))
                    .col(string(ActiveSession::SessionType))
                    .col(string(ActiveSession::SessionId))
                    .col(string(ActiveSession::Username))
                    .col(string_null(ActiveSession::IpAddress))
                    .col(string_null(ActiveSession::MacAddress))
                    .col(big_integer(ActiveSession::UploadBytes).default(0))
                    .col(big_integer(ActiveSession::DownloadBytes).default(0))
                    .col(big_integer(ActiveSession::UptimeSeconds).default(0))
                    .col(timestamp(ActiveSession::StartTime))
                    .col(timestamp(ActiveSession::LastUpdate))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_active_session_router")
                            .from(ActiveSession::Table, ActiveSession::RouterId)
                            .to(Router::Table, Router::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_active_session_customer")
                            .from(ActiveSession::Table, ActiveSession::CustomerId)
                            .to(Customer::Table, Customer::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_active_session_unique")
                    .table(ActiveSession::Table)
                    .col(ActiveSession::RouterId)
                    .col(ActiveSession::SessionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 用量台账
        manager
            .create_table(
                Table::create()
                    .table(UsageRecord::Table)
                    .if_not_exists()
                    .col(big_integer(UsageRecord::Id).auto_increment().primary_key())
                    .col(big_integer(UsageRecord::CustomerId))
                    .col(big_integer(UsageRecord::SubscriptionId))
                    .col(big_integer(UsageRecord::UploadBytes).default(0))
                    .col(big_integer(UsageRecord::DownloadBytes).default(0))
                    .col(big_integer(UsageRecord::SessionTimeSeconds).default(0))
                    .col(double(UsageRecord::UploadSpeedMbps).default(0.0))
                    .col(double(UsageRecord::DownloadSpeedMbps).default(0.0))
                    .col(string(UsageRecord::SessionId).default(""))
                    .col(string_null(UsageRecord::FramedIpAddress))
                    .col(timestamp(UsageRecord::StartTime))
                    .col(timestamp_null(UsageRecord::EndTime))
                    .col(timestamp(UsageRecord::CreatedAt))
                    .col(timestamp(UsageRecord::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_usage_record_customer")
                            .from(UsageRecord::Table, UsageRecord::CustomerId)
                            .to(Customer::Table, Customer::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_usage_record_subscription")
                            .from(UsageRecord::Table, UsageRecord::SubscriptionId)
                            .to(Subscription::Table, Subscription::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_usage_record_subscription")
                    .table(UsageRecord::Table)
                    .col(UsageRecord::CustomerId)
                    .col(UsageRecord::SubscriptionId)
                    .to_owned(),
            )
            .await?;

        // 接口吞吐
        manager
            .create_table(
                Table::create()
                    .table(RouterInterfaceStat::Table)
                    .if_not_exists()
                    .col(big_integer(RouterInterfaceStat::Id).auto_increment().primary_key())
                    .col(big_integer(RouterInterfaceStat::RouterId))
                    .col(string(RouterInterfaceStat::InterfaceName))
                    .col(big_integer(RouterInterfaceStat::RxBps).default(0))
                    .col(big_integer(RouterInterfaceStat::TxBps).default(0))
                    .col(timestamp(RouterInterfaceStat::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_router_interface_stat_router")
                            .from(RouterInterfaceStat::Table, RouterInterfaceStat::RouterId)
                            .to(Router::Table, Router::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_router_interface_stat_unique")
                    .table(RouterInterfaceStat::Table)
                    .col(RouterInterfaceStat::RouterId)
                    .col(RouterInterfaceStat::InterfaceName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RouterInterfaceStat::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UsageRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ActiveSession::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ActiveSession {
    Table,
    Id,
    RouterId,
    CustomerId,
    SessionType,
    SessionId,
    Username,
    IpAddress,
    MacAddress,
    UploadBytes,
    DownloadBytes,
    UptimeSeconds,
    StartTime,
    LastUpdate,
}

#[derive(DeriveIden)]
enum UsageRecord {
    Table,
    Id,
    CustomerId,
    SubscriptionId,
    UploadBytes,
    DownloadBytes,
    SessionTimeSeconds,
    UploadSpeedMbps,
    DownloadSpeedMbps,
    SessionId,
    FramedIpAddress,
    StartTime,
    EndTime,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RouterInterfaceStat {
    Table,
    Id,
    RouterId,
    InterfaceName,
    RxBps,
    TxBps,
    UpdatedAt,
}
