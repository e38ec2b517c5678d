//! 日志初始化
//!
//! 库内部只通过 `tracing` 宏输出日志，不安装订阅者；应用在启动时调用本模块的函数之一。
//! `log` 生态的记录经 `tracing-log` 桥接到同一个订阅者。
//!
//! 过滤规则优先读取 `RUST_LOG`，未设置（或无法解析）时使用传入的默认指令。

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// 默认过滤指令
pub const DEFAULT_DIRECTIVE: &str = "info";

/// 日志初始化错误
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Global subscriber already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Log bridge already installed: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),
}

/// 初始化终端日志（重复调用无害）
pub fn init_logging() {
    if let Err(e) = try_init_logging(DEFAULT_DIRECTIVE) {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

/// 初始化终端日志
///
/// # 错误
///
/// 默认指令无法解析，或进程中已安装全局订阅者。
pub fn try_init_logging(default_directive: &str) -> Result<(), LoggingError> {
    install(default_directive, std::io::stderr, true)
}

/// 初始化文件日志（追加写入，无 ANSI 颜色）
pub fn init_logging_to_file(path: impl AsRef<Path>, default_directive: &str) -> Result<(), LoggingError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    install(default_directive, Mutex::new(file), false)
}

fn install<W>(default_directive: &str, writer: W, ansi: bool) -> Result<(), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)?,
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_names(true),
    );
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
