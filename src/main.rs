//! NTRIP 代理服务器入口
//! 位置感知的RTK修正数据代理

use clap::Parser;
use tracing::info;

use ntrip_proxy::{ConfigStore, NtripServer};

/// NTRIP 代理服务器配置参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, env = "NTRIP_PROXY_CONFIG", default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 解析命令行参数
    let args = Args::parse();

    // 先加载配置（文件缺失时写出默认配置），再用其日志目录初始化日志
    let config = ConfigStore::open(&args.config)?;
    let log_dir = config.get().await.log_dir.clone();
    std::fs::create_dir_all(&log_dir)?;
    let _log_guard = ntrip_proxy::init_logging(&log_dir);

    info!("ntrip-proxy starting with config: {}", args.config);

    // 启动服务器
    let server = NtripServer::new(config).await?;
    server.run().await?;

    Ok(())
}
