mod app;
mod core;
mod utils;

use clap::Parser;

use crate::core::config::DeployConfig;
use crate::utils::logger::LogManager;

fn main() {
    // 配置在日志之前加载，决定是否启用日志
    let config = DeployConfig::load();

    if let Err(e) = LogManager::init(config.log_enabled) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    if LogManager::is_enabled() {
        match LogManager::cleanup_old_logs(config.log_retention_days) {
            Ok(removed) if removed > 0 => log::info!("已清理 {} 个旧日志文件", removed),
            Ok(_) => {}
            Err(e) => log::warn!("清理旧日志失败: {:#}", e),
        }
        log::debug!("日志目录大小: {} 字节", LogManager::get_log_dir_size());
    }

    log::info!("wcit {} 启动", env!("CARGO_PKG_VERSION"));

    let cli = app::Cli::parse();
    let code = match app::run(cli, config) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("执行失败: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };

    log::info!("wcit 退出，退出码 {}", code);
    LogManager::shutdown();
    std::process::exit(code);
}
