//! NMEA日志模块
//! 记录收到的全部GPGGA语句：全局共享日志按行追加，另为每个会话保留单独文件

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::error::Result;

/// 共享NMEA日志文件名
const SHARED_LOG_NAME: &str = "nmea.log";

/// 会话级NMEA文件目录名
const SESSION_DIR_NAME: &str = "sessions";

/// NMEA语句日志记录器
///
/// 共享日志跨会话追加写入，互斥锁保证行粒度原子性。
pub struct NmeaLogger {
    /// 全局追加日志
    shared: Mutex<File>,
    /// 会话文件目录
    session_dir: PathBuf,
    /// 打开的会话文件句柄
    session_files: Mutex<HashMap<Uuid, File>>,
}

impl NmeaLogger {
    /// 在指定日志目录下创建记录器
    pub async fn open(log_dir: &Path) -> Result<Self> {
        let session_dir = log_dir.join(SESSION_DIR_NAME);
        tokio::fs::create_dir_all(&session_dir).await?;

        let shared = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(SHARED_LOG_NAME))
            .await?;

        Ok(Self {
            shared: Mutex::new(shared),
            session_dir,
            session_files: Mutex::new(HashMap::new()),
        })
    }

    /// 追加一条NMEA语句到共享日志和会话文件
    pub async fn append(&self, session: Uuid, sentence: &str) -> Result<()> {
        let line = format!("{}\n", sentence.trim_end());

        {
            let mut shared = self.shared.lock().await;
            shared.write_all(line.as_bytes()).await?;
        }

        let mut files = self.session_files.lock().await;
        if !files.contains_key(&session) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.session_path(session))
                .await?;
            files.insert(session, file);
        }
        if let Some(file) = files.get_mut(&session) {
            file.write_all(line.as_bytes()).await?;
        }

        Ok(())
    }

    /// 关闭会话文件句柄，文件本身保留给保留期清理
    pub async fn close_session(&self, session: Uuid) {
        if self.session_files.lock().await.remove(&session).is_some() {
            debug!(session = %session, "session NMEA file closed");
        }
    }

    /// 会话NMEA文件路径
    pub fn session_path(&self, session: Uuid) -> PathBuf {
        self.session_dir.join(format!("{}.nmea", session))
    }

    /// 会话文件目录
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }
}
