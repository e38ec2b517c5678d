//! 全局日志初始化（独立进程，只能成功一次）

use hwlink_sdk::logging::{LoggingError, try_init_logging};

#[test]
fn test_logging_initializes_once() {
    try_init_logging("hwlink=debug").unwrap();
    tracing::info!("logging ready");
    log::info!("bridged from log");

    let err = try_init_logging("info").unwrap_err();
    assert!(matches!(err, LoggingError::Subscriber(_)));

    // 已初始化时静默返回
    hwlink_sdk::init_logging();
}
