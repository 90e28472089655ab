use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::prelude::*;
use std::fs::create_dir_all;
use std::path;
use tokio::sync::OnceCell;
use tracing::info;

mod m20261001_000001_init;
mod m20261001_000002_create_shadow_account;
mod m20261003_000001_create_usage;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_init::Migration),
            Box::new(m20261001_000002_create_shadow_account::Migration),
            Box::new(m20261003_000001_create_usage::Migration),
        ]
    }
}

static DATABASE_CONNECTION: OnceCell<DatabaseConnection> = OnceCell::const_new();

/// 全局数据库连接（首次调用时按配置连接并迁移）
pub async fn get_connection() -> Result<&'static DatabaseConnection> {
    DATABASE_CONNECTION
        .get_or_try_init(|| async {
            let config = crate::config::get_config().await;
            connect(&config.database_url).await
        })
        .await
}

/// 连接数据库并执行迁移
pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    ensure_sqlite_dir(database_url)?;

    let mut options = ConnectOptions::new(database_url.to_string());
    options.sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .with_context(|| format!("无法连接数据库: {}", database_url))?;

    Migrator::up(&db, None).await?;
    info!("✅ 数据库初始化完成");
    Ok(db)
}

/// 为 SQLite 文件创建所在目录
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or_default();
    if file.is_empty() || file.contains(":memory:") {
        return Ok(());
    }

    if let Some(parent) = path::Path::new(file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent).with_context(|| format!("无法创建数据目录: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// 测试用内存数据库（单连接，保证所有查询落在同一个库）
#[cfg(test)]
pub async fn memory() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await.expect("failed to open sqlite memory db");
    Migrator::up(&db, None).await.expect("failed to migrate");
    db
}
