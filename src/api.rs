//! 管理API模块
//! 提供HTTP/JSON接口：只读访问连接注册表，经配置存储的替换入口编辑基准站

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use tracing::{info, warn};

use crate::common::error::{ProxyError, Result};
use crate::config::hot_reload::ConfigStore;
use crate::config::{ServerConfig, StationConfig};
use crate::connection::registry::ConnectionRegistry;

/// API共享状态
#[derive(Clone)]
pub struct ApiState {
    /// 配置存储
    config: Arc<ConfigStore>,
    /// 连接注册表（只读）
    registry: Arc<ConnectionRegistry>,
    /// 启动时间
    started: Instant,
}

impl ApiState {
    /// 创建API状态
    pub fn new(config: Arc<ConfigStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            config,
            registry,
            started: Instant::now(),
        }
    }
}

/// 服务状态响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiStatus {
    /// 服务状态
    status: &'static str,
    /// 版本信息
    version: &'static str,
    /// 运行时长（秒）
    uptime_seconds: u64,
    /// 在线会话数
    active_sessions: usize,
    /// 注册表内会话总数
    total_sessions: usize,
}

/// 统一错误响应
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn bad_request(error: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// 获取服务状态
async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ApiStatus {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        active_sessions: state.registry.active_count().await,
        total_sessions: state.registry.total_count().await,
    })
}

/// 获取全部会话快照（在线与近期离线）
async fn get_connections(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.snapshot().await)
}

/// 获取当前配置
async fn get_config(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.config.get().await.as_ref().clone())
}

/// 整体替换配置
async fn put_config(
    State(state): State<ApiState>,
    Json(new): Json<ServerConfig>,
) -> Response {
    match state.config.replace(new).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e),
    }
}

/// 基准站列表
async fn get_stations(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.config.get().await.stations.clone())
}

/// 新增基准站
async fn post_station(
    State(state): State<ApiState>,
    Json(station): Json<StationConfig>,
) -> Response {
    let mut config = state.config.get().await.as_ref().clone();
    if config.station(&station.mount_point).is_some() {
        return (
            StatusCode::CONFLICT,
            Json(ApiError {
                error: format!("挂载点已存在: {}", station.mount_point),
            }),
        )
            .into_response();
    }

    info!(mount = %station.mount_point, "admin adding station");
    config.stations.push(station);
    match state.config.replace(config).await {
        Ok(_) => StatusCode::CREATED.into_response(),
        Err(e) => bad_request(e),
    }
}

/// 更新基准站
async fn put_station(
    State(state): State<ApiState>,
    Path(mount): Path<String>,
    Json(station): Json<StationConfig>,
) -> Response {
    let mut config = state.config.get().await.as_ref().clone();
    let Some(slot) = config.stations.iter_mut().find(|s| s.mount_point == mount) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    *slot = station;

    info!(mount = %mount, "admin updating station");
    match state.config.replace(config).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e),
    }
}

/// 删除基准站
async fn delete_station(State(state): State<ApiState>, Path(mount): Path<String>) -> Response {
    let mut config = state.config.get().await.as_ref().clone();
    let before = config.stations.len();
    config.stations.retain(|s| s.mount_point != mount);
    if config.stations.len() == before {
        return StatusCode::NOT_FOUND.into_response();
    }

    info!(mount = %mount, "admin removing station");
    match state.config.replace(config).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e),
    }
}

/// Basic认证中间件
///
/// 未配置管理凭据时直接放行。
async fn require_auth(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let config = state.config.get().await;
    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password)
    else {
        return next.run(request).await;
    };

    let expected = format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    );
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected.as_str()) {
        next.run(request).await
    } else {
        warn!("admin API request rejected: bad credentials");
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"ntrip-proxy\"")],
            "unauthorized",
        )
            .into_response()
    }
}

/// 创建API路由
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/connections", get(get_connections))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/stations", get(get_stations).post(post_station))
        .route(
            "/api/stations/:mount",
            put(put_station).delete(delete_station),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// 启动管理API服务器
pub async fn serve(state: ApiState, port: u16) -> Result<()> {
    let interface = state.config.get().await.interface.clone();
    let bind_addr = format!("{}:{}", interface, port);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ProxyError::Internal(format!("无法绑定管理端口 {}: {}", bind_addr, e)))?;
    info!("admin API listening on {}", bind_addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| ProxyError::Internal(format!("admin API server failed: {}", e)))?;

    Ok(())
}
