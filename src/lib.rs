//! NTRIP 代理核心库
//! 位置感知的RTK修正数据代理：按流动站GPGGA位置选择最近基准站并透传RTCM数据

use std::path::Path;

// 公共依赖
pub use bytes::{Bytes, BytesMut};
pub use std::sync::Arc;

pub mod api;
pub mod common;
pub mod config;
pub mod connection;
pub mod server;

// 导出核心类型
pub use common::error::{ProxyError, Result};
pub use config::hot_reload::ConfigStore;
pub use config::{ServerConfig, StationConfig};
pub use connection::registry::{ConnectionRegistry, RoverSession};
pub use server::NtripServer;

/// 初始化日志
///
/// 控制台输出受RUST_LOG环境变量过滤，同时按天滚动写入日志目录。
/// 返回的guard在进程存活期间必须持有。
pub fn init_logging(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::daily(log_dir, "ntrip-proxy.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ntrip_proxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

/// 启动服务器
pub async fn start_server(config_path: &str) -> Result<()> {
    let config = ConfigStore::open(config_path)?;
    let server = NtripServer::new(Arc::clone(&config)).await?;
    server.run().await
}
