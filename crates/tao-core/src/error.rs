//! 统一错误类型定义.
//!
//! 所有 Tao crate 共用的错误类型, 支持跨模块传播.
//! 调度阶段的错误可能被多个线程同时读取, 因此 [`TaoError::StageFailed`] 以 `Arc` 持有原始错误.

use std::sync::Arc;

use thiserror::Error;

/// Tao 框架统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 编解码器错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),

    /// 帧内某个 CTU 阶段执行失败
    ///
    /// 同一帧只记录第一个失败, `source` 为阶段回调返回的原始错误.
    #[error("CTU ({x}, {y}) 阶段 {stage} 失败: {source}")]
    StageFailed {
        stage: &'static str,
        x: u32,
        y: u32,
        #[source]
        source: Arc<TaoError>,
    },
}

/// Tao 框架统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;
