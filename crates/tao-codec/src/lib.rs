//! # tao-codec
//!
//! Tao 解码器库, 目前提供 VVC (H.266) 的帧并行 CTU 任务调度.
//!
//! 本 crate 对标 FFmpeg 的 libavcodec 中 VVC 解码器的线程部分: 调度器只决定
//! 每个 CTU 的每个阶段何时执行, 阶段内容由 [`decoders::vvc::CtuDecoder`] 的实现者提供.
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use tao_codec::decoders::vvc::{
//!     CtuDecoder, CtuRunner, DependencyTable, FrameLayout, FrameScheduler, StageTask,
//! };
//! use tao_core::{Executor, TaoResult};
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
//! let executor = Executor::new(CtuRunner::new(Arc::new(Nop)), 2).unwrap();
//! let mut scheduler = FrameScheduler::new(&executor, Arc::new(DependencyTable::vvc()));
//! let progress = scheduler.init(0, FrameLayout::raster(4, 3, 7, true), ()).unwrap();
//! scheduler.submit().unwrap();
//! scheduler.wait().unwrap();
//! assert!(progress.is_finished());
//! ```

pub mod decoders;
