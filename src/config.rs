//! 配置管理模块
//! 加载并校验JSON格式的服务配置，文件缺失时写出默认配置

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::error::{ConfigError, Result};

pub mod hot_reload;

/// 基准站配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    /// 挂载点名称（配置内唯一）
    pub mount_point: String,

    /// 上游Caster主机
    pub host: String,

    /// 上游Caster端口
    pub port: u16,

    /// 上游用户名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// 上游密码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// 纬度（十进制度）
    pub latitude: f64,

    /// 经度（十进制度）
    pub longitude: f64,

    /// 是否参与选站
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// 服务配置快照
///
/// 启动时从文件创建，重载或管理端编辑时整体替换，从不原地修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// 下行监听地址
    pub interface: String,

    /// 下行TCP端口
    pub port: u16,

    /// 对外公布的挂载点名称
    pub mount_point: String,

    /// 拨号上游时使用的User-Agent
    pub user_agent: String,

    /// 基准站列表
    pub stations: Vec<StationConfig>,

    /// 管理API端口（仅管理协作方使用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_port: Option<u16>,

    /// 管理API用户名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,

    /// 管理API密码
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,

    /// 日志目录（应用日志与NMEA日志）
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 2101,
            mount_point: "NEAREST".to_string(),
            user_agent: "NTRIP Client/1.0".to_string(),
            stations: Vec::new(),
            admin_port: None,
            admin_username: None,
            admin_password: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl ServerConfig {
    /// 从文件加载配置
    ///
    /// 文件不存在时写出默认配置并直接使用。
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.persist(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 将配置写回文件
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(ConfigError::MissingField("interface".to_string()).into());
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port 不能为 0".to_string()).into());
        }
        if self.mount_point.is_empty() {
            return Err(ConfigError::MissingField("mountPoint".to_string()).into());
        }

        let mut seen = HashSet::new();
        for station in &self.stations {
            station.validate()?;
            if !seen.insert(station.mount_point.as_str()) {
                return Err(
                    ConfigError::DuplicateMountPoint(station.mount_point.clone()).into(),
                );
            }
        }

        if let Some(admin_port) = self.admin_port {
            if admin_port == self.port {
                return Err(ConfigError::InvalidValue(format!(
                    "adminPort {} 与下行端口冲突",
                    admin_port
                ))
                .into());
            }
        }

        Ok(())
    }

    /// 按挂载点名称查找基准站
    pub fn station(&self, mount_point: &str) -> Option<&StationConfig> {
        self.stations
            .iter()
            .find(|s| s.mount_point == mount_point)
    }
}

impl StationConfig {
    /// 校验单个基准站
    pub fn validate(&self) -> Result<()> {
        if self.mount_point.is_empty() {
            return Err(ConfigError::MissingField("station.mountPoint".to_string()).into());
        }
        if self.host.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "station[{}].host",
                self.mount_point
            ))
            .into());
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "station[{}].port 不能为 0",
                self.mount_point
            ))
            .into());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ConfigError::InvalidValue(format!(
                "station[{}].latitude 超出范围: {}",
                self.mount_point, self.latitude
            ))
            .into());
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ConfigError::InvalidValue(format!(
                "station[{}].longitude 超出范围: {}",
                self.mount_point, self.longitude
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ProxyError;

    fn sample_station(mount: &str) -> StationConfig {
        StationConfig {
            mount_point: mount.to_string(),
            host: "caster.example.com".to_string(),
            port: 2101,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            latitude: 37.5,
            longitude: -122.0,
            active: true,
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.interface, "0.0.0.0");
        assert_eq!(config.port, 2101);
        assert_eq!(config.user_agent, "NTRIP Client/1.0");
        assert!(config.stations.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_loading() {
        let json = r#"{
            "interface": "127.0.0.1",
            "port": 2102,
            "mountPoint": "RTK",
            "stations": [
                {
                    "mountPoint": "SJC",
                    "host": "caster.example.com",
                    "port": 2101,
                    "latitude": 37.3,
                    "longitude": -121.9
                }
            ],
            "adminPort": 8080
        }"#;

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 2102);
        assert_eq!(config.mount_point, "RTK");
        assert_eq!(config.stations.len(), 1);
        assert_eq!(config.stations[0].mount_point, "SJC");
        // active 省略时默认为 true
        assert!(config.stations[0].active);
        assert_eq!(config.admin_port, Some(8080));
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(path.exists());

        // 写出的文件可以再次加载
        let reloaded = ServerConfig::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_validate_duplicate_mount_points() {
        let config = ServerConfig {
            stations: vec![sample_station("SJC"), sample_station("SJC")],
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProxyError::Config(ConfigError::DuplicateMountPoint(_)))
        ));
    }

    #[test]
    fn test_validate_coordinate_ranges() {
        let mut bad = sample_station("SJC");
        bad.latitude = 91.0;
        let config = ServerConfig {
            stations: vec![bad],
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let mut bad = sample_station("SJC");
        bad.longitude = -181.0;
        let config = ServerConfig {
            stations: vec![bad],
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_admin_port_conflict() {
        let config = ServerConfig {
            admin_port: Some(2101),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_mount_point() {
        let config = ServerConfig {
            mount_point: String::new(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProxyError::Config(ConfigError::MissingField(_)))
        ));
    }
}
