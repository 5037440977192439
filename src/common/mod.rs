//! 公共组件与工具
//! 错误类型、NTRIP协议文本、NMEA解析与地理计算、NMEA日志

pub mod error;
pub mod geo;
pub mod nmea_log;
pub mod ntrip;
