//! # Tao (道)
//!
//! 纯 Rust 实现的 VVC (H.266) 帧并行解码调度框架.
//!
//! - **执行器**: 多优先级桶的通用线程池, 支持同步模式
//! - **CTU 调度**: 以 (CTU, 阶段) 为粒度的依赖计数调度, 帧内波前推进
//! - **帧并行**: 多个帧上下文轮转, 跨帧依赖通过进度监听器表达
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tao::codec::decoders::vvc::{
//!     CtuDecoder, DependencyTable, FrameLayout, FramePipeline, SchedulerConfig, StageTask,
//! };
//! use tao::core::TaoResult;
//!
//! struct Nop;
//!
//! impl CtuDecoder for Nop {
//!     type Frame = ();
//!     type Local = ();
//!
//!     fn local_context(&self) -> TaoResult<()> {
//!         Ok(())
//!     }
//!
//!     fn run_stage(&self, _task: &StageTask<'_, Self>, _local: &mut ()) -> TaoResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! let config = SchedulerConfig::default();
//! let mut pipeline = FramePipeline::new(Arc::new(Nop), DependencyTable::vvc(), &config)?;
//! pipeline.submit_frame(FrameLayout::raster(15, 9, 7, true), ())?;
//! for outcome in pipeline.flush() {
//!     println!("frame {}: {:?}", outcome.decode_order, outcome.result);
//! }
//! # Ok::<(), tao::core::TaoError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 错误类型与通用执行器 |
//! | `tao-codec` | VVC CTU 调度与帧流水线 |

/// 错误类型与通用执行器 (对标 libavutil)
pub use tao_core as core;

/// 解码器调度 (对标 libavcodec)
pub use tao_codec as codec;

/// 获取 Tao 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
