//! 可观测性：tracing-subscriber 初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=aquifer=debug` 查看每次状态转移）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
