use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// FuzoChat Sweeper - 在线状态过期清扫守护进程
#[derive(Parser, Debug)]
#[command(name = "fuzochat-sweeper")]
#[command(version)]
#[command(about = "FuzoChat 在线状态过期清扫与运维工具", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 数据库连接 URL
    #[arg(long, value_name = "URL", help = "数据库连接字符串")]
    pub database_url: Option<String>,

    /// 清扫间隔（秒）
    #[arg(long, value_name = "SECS", help = "清扫任务执行间隔（秒）")]
    pub sweep_interval: Option<u64>,

    /// 会话过期阈值（秒）
    #[arg(long, value_name = "SECS", help = "心跳超过该时长未更新即下线")]
    pub stale_after: Option<u64>,

    /// 只执行一轮清扫后退出
    #[arg(long, help = "执行一轮清扫后退出（适合 cron 调度）")]
    pub once: bool,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 启用监控指标
    #[arg(long, help = "启用 Prometheus 监控指标")]
    pub enable_metrics: bool,

    /// 监控端口
    #[arg(long, value_name = "PORT", help = "监控指标服务端口")]
    pub metrics_port: Option<u16>,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn get_log_level(&self) -> Option<String> {
        if self.dev {
            Some("debug".to_string())
        } else {
            self.log_level.clone()
        }
    }

    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            Some("pretty".to_string())
        } else {
            self.log_format.clone()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行数据库迁移
    Migrate,
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}
