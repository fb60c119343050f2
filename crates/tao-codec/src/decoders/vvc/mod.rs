//! VVC (H.266) 帧并行 CTU 任务调度.
//!
//! 解码一帧的工作被拆成 (CTU, 阶段) 粒度的任务, 阶段之间的空间依赖由 [`DependencyTable`]
//! 描述, 跨帧依赖由 [`FrameProgress`] 上的监听器描述. 调度器只负责 "何时执行",
//! 每个阶段的实际工作由 [`CtuDecoder`] 的实现者完成.
//!
//! 层次:
//! - [`FrameScheduler`]: 单个帧上下文的 `init` / `submit` / `wait`
//! - [`FramePipeline`]: 多个帧上下文轮转, 提供按解码顺序的帧级结果

mod deps;
mod layout;
mod pipeline;
mod progress;
mod stage;
mod task;
mod thread;

#[cfg(test)]
mod tests;

pub use deps::{Dependency, DependencyTable};
pub use layout::{FrameLayout, SliceLayout};
pub use pipeline::{FrameOutcome, FramePipeline, MAX_DELAYED_FRAMES, SchedulerConfig, SubmittedFrame};
pub use progress::{FrameProgress, ProgressKind, ProgressListener};
pub use stage::Stage;
pub use thread::{CtuDecoder, CtuExecutor, CtuJob, CtuRunner, FrameScheduler, StageTask};
