//! 上游Caster客户端模块
//! 与上游NTRIP Caster建立TCP会话并发出订阅请求，返回的字节流原样透传

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::common::error::{ConfigError, ProxyError, Result, TransportError};
use crate::config::StationConfig;

/// 上游连接超时
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 缺省User-Agent
const DEFAULT_USER_AGENT: &str = "NTRIP Client/1.0";

/// 与单个基准站的上游会话
///
/// 由一个流动站会话独占持有，切站时先关闭再新建，从不重叠。
#[derive(Debug)]
pub struct UpstreamLink {
    /// 底层TCP流
    pub stream: TcpStream,
    /// 服务的挂载点名称
    pub mount_point: String,
}

impl UpstreamLink {
    /// 半关闭写端后丢弃连接
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
        debug!(mount = %self.mount_point, "upstream link closed");
    }
}

/// 构建发往上游Caster的NTRIP请求
///
/// 行以CRLF结尾，请求以附加CRLF终止。不解析Caster的响应。
pub fn build_request(station: &StationConfig, user_agent: &str) -> String {
    let user_agent = if user_agent.is_empty() {
        DEFAULT_USER_AGENT
    } else {
        user_agent
    };
    let credentials = format!(
        "{}:{}",
        station.username.as_deref().unwrap_or(""),
        station.password.as_deref().unwrap_or("")
    );

    format!(
        "GET /{mount} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Ntrip-Version: Ntrip/2.0\r\n\
         User-Agent: {user_agent}\r\n\
         Connection: keep-alive\r\n\
         Authorization: Basic {auth}\r\n\
         \r\n",
        mount = station.mount_point,
        host = station.host,
        port = station.port,
        auth = BASE64.encode(credentials),
    )
}

/// 拨号上游基准站
///
/// TCP连接受10秒硬超时约束；成功后立即写出订阅请求。
pub async fn dial(station: &StationConfig, user_agent: &str) -> Result<UpstreamLink> {
    if station.host.is_empty() {
        return Err(ConfigError::MissingField("station.host".to_string()).into());
    }
    if station.mount_point.is_empty() {
        return Err(ConfigError::MissingField("station.mountPoint".to_string()).into());
    }

    let target = format!("{}:{}", station.host, station.port);
    let mut stream = timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((station.host.as_str(), station.port)),
    )
    .await
    .map_err(|_| ProxyError::Timeout)?
    .map_err(|e| TransportError::Connect {
        target: target.clone(),
        source: e,
    })?;

    let request = build_request(station, user_agent);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| TransportError::Write {
            target: target.clone(),
            source: e,
        })?;

    info!(mount = %station.mount_point, target = %target, "upstream link established");
    Ok(UpstreamLink {
        stream,
        mount_point: station.mount_point.clone(),
    })
}
