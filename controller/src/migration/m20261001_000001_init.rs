use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 路由器
        manager
            .create_table(
                Table::create()
                    .table(Router::Table)
                    .if_not_exists()
                    .col(big_integer(Router::Id).auto_increment().primary_key())
                    .col(string(Router::Name))
                    .col(string(Router::Host).unique_key())
                    .col(integer(Router::Port).default(8728))
                    .col(string(Router::Username))
                    .col(string(Router::Password))
                    .col(boolean(Router::UseSsl).default(false))
                    .col(boolean(Router::IsActive).default(true))
                    .col(timestamp_null(Router::LastSync))
                    .col(timestamp(Router::CreatedAt))
                    .col(timestamp(Router::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 客户
        manager
            .create_table(
                Table::create()
                    .table(Customer::Table)
                    .if_not_exists()
                    .col(big_integer(Customer::Id).auto_increment().primary_key())
                    .col(string(Customer::Username).unique_key())
                    .col(string(Customer::ServiceType).default("pppoe"))
                    .col(string(Customer::Status).default("pending"))
                    .col(string_null(Customer::PppoeUsername))
                    .col(string_null(Customer::PppoePassword))
                    .col(string_null(Customer::HotspotUsername))
                    .col(string_null(Customer::HotspotPassword))
                    .col(string_null(Customer::HotspotMacAddress))
                    .col(timestamp(Customer::CreatedAt))
                    .col(timestamp(Customer::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 套餐
        manager
            .create_table(
                Table::create()
                    .table(Plan::Table)
                    .if_not_exists()
                    .col(big_integer(Plan::Id).auto_increment().primary_key())
                    .col(string(Plan::Name))
                    .col(string(Plan::ServiceType))
                    .col(integer(Plan::UploadMbps))
                    .col(integer(Plan::DownloadMbps))
                    .col(string(Plan::ProfileName))
                    .col(integer(Plan::DurationValue).default(30))
                    .col(string(Plan::DurationUnit).default("days"))
                    .col(boolean(Plan::IsActive).default(true))
                    .col(timestamp(Plan::CreatedAt))
                    .col(timestamp(Plan::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 套餐 <-> 路由器
        manager
            .create_table(
                Table::create()
                    .table(PlanRouter::Table)
                    .if_not_exists()
                    .col(big_integer(PlanRouter::Id).auto_increment().primary_key())
                    .col(big_integer(PlanRouter::PlanId))
                    .col(big_integer(PlanRouter::RouterId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plan_router_plan")
                            .from(PlanRouter::Table, PlanRouter::PlanId)
                            .to(Plan::Table, Plan::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plan_router_router")
                            .from(PlanRouter::Table, PlanRouter::RouterId)
                            .to(Router::Table, Router::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plan_router_unique")
                    .table(PlanRouter::Table)
                    .col(PlanRouter::PlanId)
                    .col(PlanRouter::RouterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 订阅
        manager
            .create_table(
                Table::create()
                    .table(Subscription::Table)
                    .if_not_exists()
                    .col(big_integer(Subscription::Id).auto_increment().primary_key())
                    .col(big_integer(Subscription::CustomerId))
                    .col(big_integer(Subscription::PlanId))
                    .col(string(Subscription::Status).default("active"))
                    .col(timestamp(Subscription::StartDate))
                    .col(timestamp(Subscription::ExpiryDate))
                    .col(timestamp(Subscription::CreatedAt))
                    .col(timestamp(Subscription::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_customer")
                            .from(Subscription::Table, Subscription::CustomerId)
                            .to(Customer::Table, Customer::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_plan")
                            .from(Subscription::Table, Subscription::PlanId)
                            .to(Plan::Table, Plan::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // 到期扫描按 (status, expiry_date) 查询
        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_status_expiry")
                    .table(Subscription::Table)
                    .col(Subscription::Status)
                    .col(Subscription::ExpiryDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_customer_id")
                    .table(Subscription::Table)
                    .col(Subscription::CustomerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscription::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PlanRouter::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Plan::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Customer::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Router::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Router {
    Table,
    Id,
    Name,
    Host,
    Port,
    Username,
    Password,
    UseSsl,
    IsActive,
    LastSync,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum Customer {
    Table,
    Id,
    Username,
    ServiceType,
    Status,
    PppoeUsername,
    PppoePassword,
    HotspotUsername,
    HotspotPassword,
    HotspotMacAddress,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Plan {
    Table,
    Id,
    Name,
    ServiceType,
    UploadMbps,
    DownloadMbps,
    ProfileName,
    DurationValue,
    DurationUnit,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PlanRouter {
    Table,
    Id,
    PlanId,
    RouterId,
}

#[derive(DeriveIden)]
pub(crate) enum Subscription {
    Table,
    Id,
    CustomerId,
    PlanId,
    Status,
    StartDate,
    ExpiryDate,
    CreatedAt,
    UpdatedAt,
}
