//! 连接注册表模块
//! 维护全部流动站会话（在线与近期离线）的快照，供管理端只读访问

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::geo::GgaFix;

/// 离线会话保留时长（默认7天）
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// 过期清理周期（默认6小时）
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// 流动站会话快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoverSession {
    /// 会话ID
    pub id: Uuid,
    /// 客户端地址
    pub remote_addr: SocketAddr,
    /// 连接建立时间
    pub connected_at: DateTime<Utc>,
    /// 发送给流动站的字节数
    pub bytes_sent: u64,
    /// 从流动站收到的字节数
    pub bytes_received: u64,
    /// 最后解析出的位置
    pub position: Option<GgaFix>,
    /// 当前绑定的上游挂载点
    pub station: Option<String>,
    /// 会话是否在线
    pub active: bool,
    /// 断开时间
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl RoverSession {
    /// 创建新会话记录
    pub fn new(id: Uuid, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            bytes_sent: 0,
            bytes_received: 0,
            position: None,
            station: None,
            active: true,
            disconnected_at: None,
        }
    }
}

/// 连接注册表
///
/// 仅由会话生命周期钩子写入；管理端与清理任务读取。
/// 锁覆盖整个映射，单条记录的更新为粗粒度操作。
pub struct ConnectionRegistry {
    /// 会话ID -> 会话快照
    sessions: RwLock<HashMap<Uuid, RoverSession>>,
    /// 离线会话保留时长
    retention: Duration,
    /// 会话NMEA文件目录，清理时连带删除
    session_log_dir: Option<PathBuf>,
}

impl ConnectionRegistry {
    /// 创建注册表
    pub fn new(retention: Duration, session_log_dir: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            retention,
            session_log_dir,
        })
    }

    /// 登记新会话
    pub async fn track(&self, session: RoverSession) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);
    }

    /// 合并更新单条会话记录
    pub async fn update<F>(&self, id: Uuid, apply: F)
    where
        F: FnOnce(&mut RoverSession),
    {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            apply(session);
        }
    }

    /// 标记会话已关闭
    pub async fn mark_closed(&self, id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.active = false;
            session.station = None;
            session.disconnected_at = Some(Utc::now());
        }
    }

    /// 读取单条会话快照
    pub async fn get(&self, id: Uuid) -> Option<RoverSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// 全部会话快照，最新连接在前
    pub async fn snapshot(&self) -> Vec<RoverSession> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<RoverSession> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        all
    }

    /// 在线会话数
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.values().filter(|s| s.active).count()
    }

    /// 历史会话总数（含在线）
    pub async fn total_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 清理超出保留期的会话及其附属NMEA文件
    ///
    /// 离线会话按断开时间判断；仍在线但超期的按连接时间判断。
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));

        let expired: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.disconnected_at.unwrap_or(s.connected_at) < cutoff)
                .map(|s| s.id)
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
            if let Some(dir) = &self.session_log_dir {
                let path = dir.join(format!("{}.nmea", id));
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!(path = %path.display(), "failed to remove session NMEA file: {}", e);
                    }
                }
            }
        }

        info!("swept {} expired session(s) from registry", expired.len());
        expired.len()
    }

    /// 启动周期清理任务
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 首个tick立即返回，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep(Utc::now()).await;
            }
        })
    }
}
