//! 代理服务器模块
//! 绑定下行监听端口，为每个流动站连接派生一个会话引擎

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::api;
use crate::common::error::{ProxyError, Result};
use crate::common::nmea_log::NmeaLogger;
use crate::config::hot_reload::ConfigStore;
use crate::connection::registry::{
    ConnectionRegistry, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL,
};
use crate::connection::session::{Session, SessionContext};

/// NTRIP代理服务器
pub struct NtripServer {
    /// 配置存储
    config: Arc<ConfigStore>,
    /// 连接注册表
    registry: Arc<ConnectionRegistry>,
    /// NMEA日志
    nmea_log: Arc<NmeaLogger>,
    /// 关闭广播
    shutdown_tx: broadcast::Sender<()>,
}

impl NtripServer {
    /// 创建服务器实例
    pub async fn new(config: Arc<ConfigStore>) -> Result<Self> {
        let log_dir = config.get().await.log_dir.clone();
        let nmea_log = Arc::new(NmeaLogger::open(&log_dir).await?);
        let registry = ConnectionRegistry::new(
            DEFAULT_RETENTION,
            Some(nmea_log.session_dir().to_path_buf()),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            registry,
            nmea_log,
            shutdown_tx,
        })
    }

    /// 连接注册表句柄
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// 运行服务器直到收到终止信号
    ///
    /// 监听端口绑定失败是致命错误。
    pub async fn run(&self) -> Result<()> {
        let config = self.config.get().await;
        let bind_addr = format!("{}:{}", config.interface, config.port);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ProxyError::Internal(format!("无法绑定下行地址 {}: {}", bind_addr, e))
        })?;
        info!("NTRIP proxy listening on {}", bind_addr);

        // 后台任务：配置文件监控与注册表过期清理
        self.config.start_watcher()?;
        let _sweeper = self.registry.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);

        // 管理API（仅在配置了adminPort时启动）
        if let Some(admin_port) = config.admin_port {
            let admin_state = api::ApiState::new(Arc::clone(&self.config), self.registry());
            tokio::spawn(async move {
                if let Err(e) = api::serve(admin_state, admin_port).await {
                    error!("admin API exited with error: {}", e);
                }
            });
        }

        let ctx = SessionContext {
            config: Arc::clone(&self.config),
            registry: self.registry(),
            nmea_log: Arc::clone(&self.nmea_log),
        };

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let session = Session::new(ctx.clone(), peer_addr);
                        tokio::spawn(session.run(stream, self.shutdown_tx.subscribe()));
                    }
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    }
                },
                _ = &mut shutdown => {
                    info!("NTRIP proxy 正在关闭...");
                    break;
                }
            }
        }

        // 停止接受连接后通知所有会话关闭
        drop(listener);
        let _ = self.shutdown_tx.send(());
        let active = self.registry.active_count().await;
        if active > 0 {
            warn!("closing {} active session(s)", active);
            tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        }
        info!("shutdown complete");

        Ok(())
    }
}

/// 等待终止信号（ctrl-c 或 SIGTERM）
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
