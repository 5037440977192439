//! 错误处理模块
//! 定义统一错误类型与转换机制

use std::io::Error as IoError;
use thiserror::Error;
use serde_json::Error as SerdeError;

/// 全局错误类型
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 协议解析错误
    #[error("协议解析错误: {0}")]
    Protocol(#[from] ProtocolError),

    /// 传输错误
    #[error("传输错误: {0}")]
    Transport(#[from] TransportError),

    /// 上游连接超时
    #[error("上游连接超时")]
    Timeout,

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] IoError),

    /// 序列化/反序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] SerdeError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 文件读取失败
    #[error("配置文件读取失败 {path}: {reason}")]
    FileRead { path: String, reason: String },

    /// 解析错误
    #[error("配置解析错误: {0}")]
    ParseError(String),

    /// 缺少必填字段
    #[error("缺少必填配置字段: {0}")]
    MissingField(String),

    /// 无效值
    #[error("配置值无效: {0}")]
    InvalidValue(String),

    /// 挂载点名称重复
    #[error("挂载点名称重复: {0}")]
    DuplicateMountPoint(String),
}

/// 协议解析错误
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// 无法识别的请求行
    #[error("无法识别的请求: {0}")]
    UnknownRequest(String),

    /// NMEA语句缺少校验和分隔符
    #[error("NMEA语句缺少校验和分隔符 '*'")]
    MissingChecksum,

    /// NMEA语句字段不足
    #[error("NMEA语句字段不足: 期望至少15个字段, 实际{0}个")]
    TruncatedSentence(usize),

    /// 不支持的语句类型
    #[error("不支持的NMEA语句类型: {0}")]
    UnsupportedTalker(String),

    /// 坐标字段为空
    #[error("NMEA语句经度或纬度字段为空")]
    EmptyPosition,

    /// 坐标格式无效
    #[error("坐标格式无效: {0}")]
    InvalidCoordinate(String),
}

/// 传输错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// 连接失败（拒绝、重置、DNS失败等）
    #[error("连接 {target} 失败: {source}")]
    Connect {
        target: String,
        #[source]
        source: IoError,
    },

    /// 数据写入失败
    #[error("写入 {target} 失败: {source}")]
    Write {
        target: String,
        #[source]
        source: IoError,
    },
}

/// 简化错误类型定义
pub type Result<T> = std::result::Result<T, ProxyError>;
