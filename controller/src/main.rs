use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::TcpDeviceConnector;
use controller::config::{self, Config};
use controller::{dispatch, migration, scheduler, NetworkReconciler, ReconcileSettings, UsageCollector};

#[derive(Parser)]
#[command(name = "controller", version, about = "NetSync Controller - 计费与路由器网络状态同步")]
struct Cli {
    /// 配置文件路径（默认 controller.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 前台运行周期任务与事件 worker（默认）
    Run,
    /// 按有效订阅同步全部用户
    SyncUsers,
    /// 推送全部启用套餐的限速配置
    SyncProfiles,
    /// 推送单个套餐的限速配置
    SyncPlan {
        /// 套餐 ID
        plan_id: i64,
    },
    /// 执行一轮用量采集
    CollectUsage,
    /// 执行一次到期扫描
    Expire,
    /// 推送围墙花园条目
    WalledGarden,
}

fn init_tracing(log_dir: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    // 配置了日志目录时按天轮转写文件，否则输出到控制台
    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, "controller.log");
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(file_appender).with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    init_tracing(config.log_dir.as_deref());
    config::set_config(config);
    let config = config::get_config().await;

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls 加密提供者已安装");
    }

    let db = migration::get_connection().await?;
    let connector = Arc::new(TcpDeviceConnector::new(Duration::from_secs(config.device_timeout_secs)));
    let reconciler = Arc::new(NetworkReconciler::new(connector.clone(), ReconcileSettings::from(config)));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let collector = Arc::new(UsageCollector::new(connector, config.wan_interface.clone()));
            run(config, db, reconciler, collector).await?;
        }
        Command::SyncUsers => print_json(&reconciler.sync_all_users(db).await?)?,
        Command::SyncProfiles => print_json(&reconciler.sync_all_profiles(db).await?)?,
        Command::SyncPlan { plan_id } => print_json(&reconciler.sync_plan_to_routers(db, plan_id).await?)?,
        Command::CollectUsage => {
            let collector = UsageCollector::new(connector, config.wan_interface.clone());
            print_json(&collector.collect_all(db).await?)?;
        }
        Command::Expire => {
            let count = controller::billing::expire_subscriptions(db, &reconciler, Utc::now().naive_utc()).await?;
            print_json(&serde_json::json!({ "suspended": count }))?;
        }
        Command::WalledGarden => print_json(&reconciler.sync_walled_garden(db).await?)?,
    }

    Ok(())
}

async fn run(
    config: &Config,
    db: &sea_orm::DatabaseConnection,
    reconciler: Arc<NetworkReconciler>,
    collector: Arc<UsageCollector>,
) -> Result<()> {
    info!("📋 controller 启动");
    info!("⏰ 到期扫描间隔: {}s", config.expiry_sweep_secs);
    info!("📈 用量采集间隔: {}s", config.usage_poll_secs);

    // 事件入口由计费侧持有；这里只负责启动 worker
    let (_dispatcher, rx) = dispatch::EventDispatcher::new(256);
    let worker = dispatch::spawn_worker(rx, db.clone(), reconciler.clone());
    let tasks = scheduler::start_all(config, db, reconciler, collector);

    info!("✅ 所有服务已启动，等待终止信号...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C 信号，正在关闭服务...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("无法监听 SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("收到 SIGTERM 信号，正在关闭服务...");
        }
    }

    for task in tasks {
        task.abort();
    }
    worker.abort();
    Ok(())
}
