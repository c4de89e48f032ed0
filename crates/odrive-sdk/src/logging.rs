//! 日志初始化
//!
//! `RUST_LOG` 优先；未设置时使用调用方给出的默认过滤指令。
//! 同时安装 `log` -> `tracing` 桥接，依赖 `log` 宏的库输出也会进入同一个 subscriber。

use tracing_subscriber::EnvFilter;

/// 构造过滤器：`RUST_LOG` 存在且合法时使用它，否则使用 `default_directive`
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// 初始化全局日志
///
/// 返回是否由本次调用完成安装；进程内重复调用不会报错，只返回 `false`。
///
/// ```no_run
/// odrive_sdk::init_logging("odrive_driver=info,odrive_sdk=info");
/// ```
pub fn init_logging(default_directive: &str) -> bool {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!(error = %e, "log bridge already installed");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        // 第一次调用的结果取决于同一进程内的其他测试
        init_logging("odrive_sdk=debug");
        assert!(!init_logging("odrive_sdk=debug"));
        tracing::info!(target: "odrive_sdk", "logging ready");
    }

    #[test]
    fn test_env_filter_fallback() {
        let filter = env_filter("odrive_driver=warn");
        assert!(!filter.to_string().is_empty());
    }
}
