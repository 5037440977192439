//! 会话引擎模块
//! 每个流动站连接的协议状态机：请求识别、位置解析、选站与上游切换、双向字节转发
//!
//! 流动站与上游两个方向的事件汇入同一条事件路径，切站在事件处理中内联完成，
//! 因此每个会话的拨号天然串行，不会出现并发拨号。

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::Result;
use crate::common::geo;
use crate::common::nmea_log::NmeaLogger;
use crate::common::ntrip::{self, RoverRequest};
use crate::config::hot_reload::ConfigStore;
use crate::connection::registry::{ConnectionRegistry, RoverSession};
use crate::connection::upstream::{self, UpstreamLink};

/// 会话共享上下文
///
/// 进程启动时构建一次，由监听器传入每个会话。
#[derive(Clone)]
pub struct SessionContext {
    /// 配置存储
    pub config: Arc<ConfigStore>,
    /// 连接注册表
    pub registry: Arc<ConnectionRegistry>,
    /// NMEA日志
    pub nmea_log: Arc<NmeaLogger>,
}

/// 协议状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// 等待请求行
    AwaitingRequest,
    /// 已订阅，接收NMEA上报并转发修正数据
    Subscribed,
}

/// 单次分发的结果
enum Flow {
    Continue,
    Close,
}

/// 会话事件
enum Event {
    Rover(std::io::Result<usize>),
    Upstream(std::io::Result<usize>),
    Shutdown,
}

/// 单个流动站会话
pub struct Session {
    /// 会话ID
    id: Uuid,
    /// 客户端地址
    peer_addr: SocketAddr,
    /// 共享上下文
    ctx: SessionContext,
    /// 协议状态
    state: SessionState,
    /// 当前绑定的上游（至多一个）
    upstream: Option<UpstreamLink>,
}

impl Session {
    /// 创建新会话
    pub fn new(ctx: SessionContext, peer_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            ctx,
            state: SessionState::AwaitingRequest,
            upstream: None,
        }
    }

    /// 会话ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 运行会话直到流动站断开、协议拒绝或进程关闭
    pub async fn run(mut self, stream: TcpStream, mut shutdown: broadcast::Receiver<()>) {
        info!(session = %self.id, peer = %self.peer_addr, "rover connected");
        self.ctx
            .registry
            .track(RoverSession::new(self.id, self.peer_addr))
            .await;

        let (mut rover_rd, mut rover_wr) = stream.into_split();
        let mut rover_buf = BytesMut::with_capacity(2048);
        let mut upstream_buf = BytesMut::with_capacity(8192);

        let outcome: Result<()> = loop {
            // 两个方向的就绪事件汇入单一路径，事件处理期间不再轮询IO
            let event = {
                let upstream = self.upstream.as_mut();
                tokio::select! {
                    read = rover_rd.read_buf(&mut rover_buf) => Event::Rover(read),
                    read = async {
                        match upstream {
                            Some(link) => link.stream.read_buf(&mut upstream_buf).await,
                            None => std::future::pending().await,
                        }
                    } => Event::Upstream(read),
                    _ = shutdown.recv() => Event::Shutdown,
                }
            };

            match event {
                Event::Rover(Ok(0)) => {
                    debug!(session = %self.id, "rover closed connection");
                    break Ok(());
                }
                Event::Rover(Ok(n)) => {
                    self.ctx
                        .registry
                        .update(self.id, |s| s.bytes_received += n as u64)
                        .await;
                    let data = rover_buf.split();
                    match self.dispatch(&data, &mut rover_wr).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Event::Rover(Err(e)) => break Err(e.into()),
                Event::Upstream(Ok(0)) => {
                    self.drop_upstream("peer closed").await;
                }
                Event::Upstream(Ok(_)) => {
                    let chunk = upstream_buf.split();
                    if let Err(e) = rover_wr.write_all(&chunk).await {
                        break Err(e.into());
                    }
                    self.ctx
                        .registry
                        .update(self.id, |s| s.bytes_sent += chunk.len() as u64)
                        .await;
                }
                Event::Upstream(Err(e)) => {
                    self.drop_upstream(&format!("read error: {}", e)).await;
                }
                Event::Shutdown => {
                    debug!(session = %self.id, "shutting down");
                    break Ok(());
                }
            }
        };

        if let Some(link) = self.upstream.take() {
            link.close().await;
        }
        let _ = rover_wr.shutdown().await;
        self.ctx.nmea_log.close_session(self.id).await;
        self.ctx.registry.mark_closed(self.id).await;

        match outcome {
            Ok(()) => info!(session = %self.id, "rover session ended"),
            Err(e) => warn!(session = %self.id, "rover session ended with error: {}", e),
        }
    }

    /// 按前缀分发流动站发来的一段数据
    async fn dispatch(&mut self, data: &[u8], rover_wr: &mut OwnedWriteHalf) -> Result<Flow> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim();
        if text.is_empty() {
            return Ok(Flow::Continue);
        }

        let config = self.ctx.config.get().await;
        match ntrip::classify(text, &config.mount_point) {
            RoverRequest::Sourcetable => {
                rover_wr
                    .write_all(&ntrip::build_sourcetable(&config.mount_point))
                    .await?;
                info!(session = %self.id, "sourcetable served");
                Ok(Flow::Close)
            }
            RoverRequest::Subscribe => {
                rover_wr.write_all(ntrip::ICY_OK).await?;
                if self.state != SessionState::Subscribed {
                    self.state = SessionState::Subscribed;
                    info!(session = %self.id, mount = %config.mount_point, "rover subscribed");
                }
                Ok(Flow::Continue)
            }
            RoverRequest::Position(sentences) => {
                self.handle_nmea(sentences).await;
                Ok(Flow::Continue)
            }
            RoverRequest::Unknown(line) => {
                warn!(
                    session = %self.id,
                    request = %line.lines().next().unwrap_or(""),
                    "unrecognized request, closing"
                );
                Ok(Flow::Close)
            }
        }
    }

    /// 处理一段NMEA上报，可能包含多行语句
    async fn handle_nmea(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if !line.starts_with("$GPGGA") && !line.starts_with("$GNGGA") {
                continue;
            }

            if let Err(e) = self.ctx.nmea_log.append(self.id, line).await {
                warn!(session = %self.id, "failed to append NMEA log: {}", e);
            }

            let fix = match geo::parse_gpgga(line) {
                Ok(fix) => fix,
                Err(e) => {
                    // 解析失败忽略该语句，绑定保持不变
                    warn!(session = %self.id, "ignoring unparseable GGA sentence: {}", e);
                    continue;
                }
            };

            let (latitude, longitude) = (fix.latitude, fix.longitude);
            self.ctx
                .registry
                .update(self.id, move |s| s.position = Some(fix))
                .await;
            self.evaluate_binding(latitude, longitude).await;
        }
    }

    /// 根据最新位置评估上游绑定
    ///
    /// 每次都读取当前配置快照，重载后的站表在下一次选站立即生效。
    async fn evaluate_binding(&mut self, latitude: f64, longitude: f64) {
        let config = self.ctx.config.get().await;
        let selection = geo::find_closest_station(latitude, longitude, &config.stations);

        // 无候选基准站时保持现有绑定
        let Some((station, distance)) = selection else {
            return;
        };

        if let Some(link) = &self.upstream {
            if link.mount_point == station.mount_point {
                return;
            }
        }

        // 先关后拨，绝不重叠
        if let Some(link) = self.upstream.take() {
            info!(
                session = %self.id,
                from = %link.mount_point,
                to = %station.mount_point,
                "switching upstream station"
            );
            link.close().await;
            self.ctx.registry.update(self.id, |s| s.station = None).await;
        }

        match upstream::dial(&station, &config.user_agent).await {
            Ok(link) => {
                let mount = link.mount_point.clone();
                self.ctx
                    .registry
                    .update(self.id, move |s| s.station = Some(mount))
                    .await;
                info!(
                    session = %self.id,
                    mount = %station.mount_point,
                    distance_m = distance as u64,
                    "upstream bound"
                );
                self.upstream = Some(link);
            }
            Err(e) => {
                // 留在未绑定状态，下一条GPGGA重试选站
                warn!(
                    session = %self.id,
                    mount = %station.mount_point,
                    "upstream dial failed: {}",
                    e
                );
            }
        }
    }

    /// 上游对端关闭或出错时解除绑定，流动站连接保持
    async fn drop_upstream(&mut self, reason: &str) {
        if let Some(link) = self.upstream.take() {
            warn!(
                session = %self.id,
                mount = %link.mount_point,
                "upstream link lost ({}), will re-dial on next GGA",
                reason
            );
            link.close().await;
            self.ctx.registry.update(self.id, |s| s.station = None).await;
        }
    }
}
