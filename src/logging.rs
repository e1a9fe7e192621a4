use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统
///
/// 返回的 guard 在进程存活期间必须被持有，否则文件日志的
/// 后台写线程会提前退出。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "fuzochat.log".to_string());

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            match log_format {
                Some("json") => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().json().with_writer(writer).with_ansi(false))
                        .init();
                }
                Some("pretty") | Some("dev") => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().pretty().with_writer(writer).with_ansi(false))
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().compact().with_writer(writer).with_ansi(false))
                        .init();
                }
            }
            Ok(Some(guard))
        }
        None => {
            match log_format {
                Some("json") => {
                    // JSON 格式（适合生产环境）
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().json())
                        .init();
                }
                Some("pretty") | Some("dev") => {
                    // Pretty 格式（适合开发环境）
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().pretty())
                        .init();
                }
                _ => {
                    // Compact 格式（默认）
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().compact())
                        .init();
                }
            }
            Ok(None)
        }
    }
}
