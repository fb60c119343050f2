//! # tao-core
//!
//! Tao 核心库, 提供统一错误处理与通用并发执行器.
//!
//! 本 crate 对标 FFmpeg 的 libavutil, 为上层解码器提供底层基础设施.

pub mod error;
pub mod executor;

// 重导出常用类型
pub use error::{TaoError, TaoResult};
pub use executor::{Executor, ExecutorHandle, TaskCallbacks};
