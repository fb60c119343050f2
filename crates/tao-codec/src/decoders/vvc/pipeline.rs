//! 多帧并行解码流水线.
//!
//! 维护固定数量的帧上下文, 按解码顺序轮流使用. 在途帧数达到上下文数量时,
//! 提交新帧前先等待最早的一帧完成, 因此后续帧可以在前面的帧仍在解码时开始,
//! 帧间依赖由各帧的进度监听器保证.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use tao_core::{Executor, TaoError, TaoResult};

use super::deps::DependencyTable;
use super::layout::FrameLayout;
use super::progress::FrameProgress;
use super::thread::{CtuDecoder, CtuExecutor, CtuRunner, FrameScheduler};

/// 最多同时在途的帧数
pub const MAX_DELAYED_FRAMES: usize = 16;

/// 调度配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// 工作线程数, 0 表示按 CPU 数自动选择; 结果为 1 时改用同步模式
    pub thread_count: usize,
    /// 低延迟模式: 只使用一个帧上下文, 帧与帧之间不重叠
    pub low_delay: bool,
    /// 帧上下文数量上限
    pub max_delayed_frames: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            low_delay: false,
            max_delayed_frames: MAX_DELAYED_FRAMES,
        }
    }
}

impl SchedulerConfig {
    fn cpu_count() -> usize {
        thread::available_parallelism().map_or(1, NonZeroUsize::get)
    }

    fn auto_frames(&self) -> usize {
        Self::cpu_count().min(self.max_delayed_frames).max(1)
    }

    /// 实际创建的工作线程数, 0 表示同步模式
    pub fn resolved_threads(&self) -> usize {
        let threads = match self.thread_count {
            0 => self.auto_frames(),
            n => n,
        };
        // 单个后台线程只会增加切换开销
        if threads == 1 { 0 } else { threads }
    }

    /// 帧上下文数量
    pub fn frame_contexts(&self) -> usize {
        if self.low_delay {
            1
        } else {
            self.auto_frames()
        }
    }
}

/// 一帧的最终结果
#[derive(Debug)]
pub struct FrameOutcome {
    /// 解码顺序
    pub decode_order: u64,
    /// 第一个失败阶段的错误
    pub result: TaoResult<()>,
}

/// 已提交帧的句柄
#[derive(Debug, Clone)]
pub struct SubmittedFrame {
    /// 解码顺序
    pub decode_order: u64,
    /// 帧进度, 后续帧通过它登记参考依赖
    pub progress: Arc<FrameProgress>,
}

/// 多帧解码流水线
pub struct FramePipeline<D: CtuDecoder> {
    frames: Vec<FrameScheduler<D>>,
    executor: CtuExecutor<D>,
    /// 已提交帧数, 也是下一帧的解码顺序
    nb_frames: u64,
    /// 已提交但尚未等待的帧数
    nb_delayed: usize,
    outcomes: VecDeque<FrameOutcome>,
}

impl<D: CtuDecoder> FramePipeline<D> {
    /// 创建流水线
    pub fn new(decoder: Arc<D>, deps: DependencyTable, config: &SchedulerConfig) -> TaoResult<Self> {
        if config.max_delayed_frames == 0 {
            return Err(TaoError::InvalidArgument(
                "max_delayed_frames 必须大于 0".into(),
            ));
        }
        let threads = config.resolved_threads();
        let executor = Executor::new(CtuRunner::new(decoder), threads)?;
        let deps = Arc::new(deps);
        let frames: Vec<_> = (0..config.frame_contexts())
            .map(|_| FrameScheduler::new(&executor, Arc::clone(&deps)))
            .collect();
        info!(
            "VVC 帧流水线: 工作线程 {}, 帧上下文 {}",
            threads,
            frames.len()
        );
        Ok(Self {
            frames,
            executor,
            nb_frames: 0,
            nb_delayed: 0,
            outcomes: VecDeque::new(),
        })
    }

    /// 工作线程数, 0 表示同步模式
    pub fn thread_count(&self) -> usize {
        self.executor.thread_count()
    }

    /// 帧上下文数量
    pub fn frame_contexts(&self) -> usize {
        self.frames.len()
    }

    /// 在途帧数
    pub fn in_flight(&self) -> usize {
        self.nb_delayed
    }

    fn slot(&self, decode_order: u64) -> usize {
        (decode_order % self.frames.len() as u64) as usize
    }

    /// 提交一帧
    ///
    /// 帧上下文用满时, 先等待最早的在途帧并把结果放入结果队列.
    /// 提交失败 (布局无效等) 的帧不占用解码顺序.
    pub fn submit_frame(&mut self, layout: FrameLayout, frame: D::Frame) -> TaoResult<SubmittedFrame> {
        let decode_order = self.nb_frames;
        let slot = self.slot(decode_order);
        let scheduler = &mut self.frames[slot];
        let progress = scheduler.init(decode_order, layout, frame)?;
        scheduler.submit()?;

        self.nb_frames += 1;
        self.nb_delayed += 1;
        if self.nb_delayed >= self.frames.len() {
            self.wait_delayed();
        }
        Ok(SubmittedFrame {
            decode_order,
            progress,
        })
    }

    fn wait_delayed(&mut self) {
        let decode_order = self.nb_frames - self.nb_delayed as u64;
        let result = self.frames[self.slot(decode_order)].wait();
        self.nb_delayed -= 1;
        match &result {
            Ok(()) => debug!("frame {decode_order} 完成"),
            Err(err) => warn!("frame {decode_order} 解码失败: {err}"),
        }
        self.outcomes.push_back(FrameOutcome {
            decode_order,
            result,
        });
    }

    /// 取出一个已完成帧的结果, 按解码顺序
    pub fn receive_outcome(&mut self) -> Option<FrameOutcome> {
        self.outcomes.pop_front()
    }

    /// 等待全部在途帧, 返回所有尚未取出的结果
    pub fn flush(&mut self) -> Vec<FrameOutcome> {
        while self.nb_delayed > 0 {
            self.wait_delayed();
        }
        self.outcomes.drain(..).collect()
    }
}

impl<D: CtuDecoder> Drop for FramePipeline<D> {
    fn drop(&mut self) {
        // 在途任务持有帧引用, 必须在执行器销毁前全部完成
        while self.nb_delayed > 0 {
            self.wait_delayed();
        }
    }
}
