//! 连接处理核心模块
//! 会话引擎、上游客户端与连接注册表

pub mod registry;
pub mod session;
pub mod upstream;

// 重新导出常用类型
pub use registry::{ConnectionRegistry, RoverSession};
pub use session::{Session, SessionContext};
pub use upstream::UpstreamLink;
