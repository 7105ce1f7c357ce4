//! 日志初始化

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 安装全局 tracing subscriber（默认级别 `info`，`RUST_LOG` 优先）
///
/// 重复调用是安全的，只有第一次生效。依赖 `log` crate 的库（如 MQTT 客户端）
/// 的日志也会被转发到 tracing。
pub fn init_logger() {
    init_logger_with("info");
}

/// 同 [`init_logger`]，但使用给定的默认过滤指令（如 `"rover_driver=debug"`）
pub fn init_logger_with(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        // 已有其他 subscriber 时保持原样
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            let _ = tracing_log::LogTracer::init();
        }
    });
}
