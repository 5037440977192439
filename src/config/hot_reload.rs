//! 配置热加载模块
//! 维护原子配置快照，监控配置文件变化并动态重载

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::ServerConfig;
use crate::common::error::Result;

/// 文件变更后的延迟加载时间，避免读到写入一半的文件
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// 配置存储
///
/// 单写多读：重载器与管理端替换快照，每个会话在选站时读取。
/// 快照不可变，替换是一次指针交换。
pub struct ConfigStore {
    /// 当前配置快照
    current: RwLock<Arc<ServerConfig>>,
    /// 配置文件路径
    path: PathBuf,
    /// 变更通知通道
    update_tx: broadcast::Sender<Arc<ServerConfig>>,
    /// 文件监听器句柄
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

impl ConfigStore {
    /// 从配置文件打开存储，文件缺失时写出默认配置
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        let config = ServerConfig::load(&path)?;
        let (update_tx, _) = broadcast::channel(16);

        Ok(Arc::new(Self {
            current: RwLock::new(Arc::new(config)),
            path,
            update_tx,
            watcher: std::sync::Mutex::new(None),
        }))
    }

    /// 获取当前配置快照
    pub async fn get(&self) -> Arc<ServerConfig> {
        self.current.read().await.clone()
    }

    /// 配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 订阅配置变更通知
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerConfig>> {
        self.update_tx.subscribe()
    }

    /// 重新加载配置文件
    ///
    /// 解析或校验失败时保留原快照并返回错误。
    pub async fn reload(&self) -> Result<Arc<ServerConfig>> {
        let config = Arc::new(ServerConfig::load(&self.path)?);
        self.publish(config.clone()).await;
        info!("configuration reloaded, {} station(s)", config.stations.len());
        Ok(config)
    }

    /// 用新配置整体替换快照并持久化到文件
    ///
    /// 管理端编辑的唯一入口。校验失败时文件与快照均不变。
    pub async fn replace(&self, new: ServerConfig) -> Result<Arc<ServerConfig>> {
        new.validate()?;
        new.persist(&self.path)?;

        let config = Arc::new(new);
        self.publish(config.clone()).await;
        info!("configuration replaced, {} station(s)", config.stations.len());
        Ok(config)
    }

    async fn publish(&self, config: Arc<ServerConfig>) {
        *self.current.write().await = config.clone();
        // 没有订阅者不算错误
        let _ = self.update_tx.send(config);
    }

    /// 启动配置文件监控
    pub fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<()>(10);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        let _ = tx.blocking_send(());
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| crate::common::error::ProxyError::Internal(e.to_string()))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| crate::common::error::ProxyError::Internal(e.to_string()))?;

        *self.watcher.lock().expect("watcher lock poisoned") = Some(watcher);
        info!("config watcher started for {}", self.path.display());

        let store = Arc::clone(self);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // 等待写入完成，并吸收编辑器连续触发的事件
                sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                match store.reload().await {
                    Ok(_) => {}
                    Err(e) => {
                        error!("failed to reload configuration: {}", e);
                        warn!("previous configuration retained");
                    }
                }
            }
        });

        Ok(())
    }
}
