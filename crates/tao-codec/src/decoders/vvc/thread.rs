//! CTU 级帧内并行调度.
//!
//! 一帧被划分为 CTU 网格, 每个 CTU 依次经过 [`Stage`] 的各个阶段. 每个 (CTU, 阶段)
//! 持有一个原子分数: 邻居完成相关阶段时为其加一分, 自身完成上一阶段时再加一分,
//! 分数达到 `目标 + 1` 的那一刻任务被提交到执行器. 依赖图不显式存储,
//! 全部由依赖表中的偏移与这些计数器隐式表达.
//!
//! 跨帧依赖 (帧间预测等待参考帧像素, 时域运动矢量预测等待同位帧运动矢量)
//! 通过向其它帧的 [`FrameProgress`] 注册监听器实现, 不做任何轮询.
//!
//! 一帧解码结束的判定: 已提交任务数与已注册监听器数同时归零.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use log::{debug, error, trace, warn};
use tao_core::{Executor, ExecutorHandle, TaoError, TaoResult, TaskCallbacks};

use super::deps::DependencyTable;
use super::layout::FrameLayout;
use super::progress::{FrameProgress, ProgressKind, ProgressListener};
use super::stage::Stage;
use super::task::{CtuGrid, CtuTask};

/// CTU 解码器
///
/// 调度器只决定 "何时" 执行哪个 CTU 的哪个阶段, 阶段的实际工作由实现者完成.
pub trait CtuDecoder: Send + Sync + Sized + 'static {
    /// 每帧的解码数据 (码流、图像缓冲等), 调度器在阶段回调中原样传回
    type Frame: Send + Sync + 'static;

    /// 工作线程局部上下文
    type Local: Send + 'static;

    /// 为一个工作线程创建局部上下文
    fn local_context(&self) -> TaoResult<Self::Local>;

    /// 执行一个 CTU 的一个阶段
    ///
    /// 返回错误后该帧停止推进, 错误在 [`FrameScheduler::wait`] 时返回.
    fn run_stage(&self, task: &StageTask<'_, Self>, local: &mut Self::Local) -> TaoResult<()>;
}

/// 正在执行的 (CTU, 阶段)
pub struct StageTask<'a, D: CtuDecoder> {
    frame: &'a Arc<FrameThread<D>>,
    task: &'a CtuTask,
    stage: Stage,
}

impl<'a, D: CtuDecoder> StageTask<'a, D> {
    /// 当前阶段
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// CTU 列
    pub fn x(&self) -> u32 {
        self.task.rx
    }

    /// CTU 行
    pub fn y(&self) -> u32 {
        self.task.ry
    }

    /// 光栅序地址
    pub fn raster(&self) -> u32 {
        self.task.rs
    }

    /// CTU 边长的 log2
    pub fn ctu_log2_size(&self) -> u8 {
        self.frame.layout.ctu_log2_size
    }

    /// 帧的解码顺序
    pub fn decode_order(&self) -> u64 {
        self.frame.decode_order
    }

    /// 帧数据
    pub fn frame(&self) -> &'a D::Frame {
        let frame: &'a FrameThread<D> = self.frame;
        &frame.frame
    }

    /// 所属 slice 下标
    pub fn slice_index(&self) -> u32 {
        self.task
            .slice()
            .expect("提交时已检查每个 CTU 恰好属于一个 slice")
    }

    /// slice 内的入口点下标
    pub fn entry_point_index(&self) -> u32 {
        self.task.entry()
    }

    /// slice 内按解码顺序的下标
    pub fn ctu_index(&self) -> u32 {
        self.task.ctu_idx()
    }

    /// 本帧是否已有阶段失败
    pub fn is_frame_failed(&self) -> bool {
        self.frame.is_failed()
    }

    /// 解析阶段登记一个帧间参考块
    ///
    /// 本 CTU 的帧间预测阶段会等到 `reference` 的像素进度越过第 `y` 行才执行.
    pub fn wait_for_reference(&self, reference: &FrameProgress, y: i32) -> TaoResult<()> {
        self.expect_stage(Stage::Parse, "wait_for_reference")?;
        if !self.task.add_inter_target() {
            return Err(TaoError::InvalidData(format!(
                "CTU ({}, {}) 帧间参考块过多",
                self.task.rx, self.task.ry
            )));
        }
        self.frame.add_listener(
            reference,
            self.task,
            ProgressKind::Pixel,
            y,
            Stage::InterPredict,
        );
        Ok(())
    }

    /// 运动矢量要在帧间预测 (解码端运动矢量细化) 之后才能对外可见
    pub fn defer_motion_progress(&self) -> TaoResult<()> {
        self.expect_stage(Stage::Parse, "defer_motion_progress")?;
        self.task.set_defer_motion();
        Ok(())
    }

    fn expect_stage(&self, stage: Stage, what: &str) -> TaoResult<()> {
        if self.stage != stage {
            return Err(TaoError::InvalidArgument(format!(
                "{what} 只能在 {stage} 阶段调用, 当前为 {}",
                self.stage
            )));
        }
        Ok(())
    }
}

/// 执行器任务: 某帧中的一个 CTU
pub struct CtuJob<D: CtuDecoder> {
    frame: Arc<FrameThread<D>>,
    rs: u32,
}

/// 把 CTU 任务接到通用执行器上的回调
pub struct CtuRunner<D: CtuDecoder> {
    decoder: Arc<D>,
}

impl<D: CtuDecoder> CtuRunner<D> {
    /// 创建回调
    pub fn new(decoder: Arc<D>) -> Self {
        Self { decoder }
    }

    /// 解码器
    pub fn decoder(&self) -> &Arc<D> {
        &self.decoder
    }
}

impl<D: CtuDecoder> TaskCallbacks for CtuRunner<D> {
    type Task = CtuJob<D>;
    type Local = D::Local;

    fn priorities(&self) -> usize {
        Stage::PRIORITIES
    }

    fn priority(&self, job: &CtuJob<D>) -> usize {
        job.frame
            .grid
            .task(job.rs)
            .map_or(0, |task| task.stage().priority())
    }

    fn local_context(&self) -> TaoResult<D::Local> {
        self.decoder.local_context()
    }

    fn run(&self, job: CtuJob<D>, local: &mut D::Local) {
        job.frame.run(job.rs, local);
    }
}

/// CTU 执行器
pub type CtuExecutor<D> = Executor<CtuRunner<D>>;

/// 执行完一个阶段后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// 同一 CTU 的下一阶段已就绪, 由当前线程直接继续
    Continue(Stage),
    /// 交还执行器
    Yield,
}

/// 本帧第一个错误
enum FrameFailure {
    /// 阶段回调失败
    Stage {
        stage: Stage,
        x: u32,
        y: u32,
        error: Arc<TaoError>,
    },
    /// 提交时布局检查失败
    Layout(String),
}

impl FrameFailure {
    fn to_error(&self) -> TaoError {
        match self {
            Self::Stage { stage, x, y, error } => TaoError::StageFailed {
                stage: stage.name(),
                x: *x,
                y: *y,
                source: Arc::clone(error),
            },
            Self::Layout(msg) => TaoError::InvalidData(msg.clone()),
        }
    }
}

/// 一帧的调度状态, 由所有工作线程共享
pub(crate) struct FrameThread<D: CtuDecoder> {
    decoder: Arc<D>,
    executor: ExecutorHandle<CtuRunner<D>>,
    deps: Arc<DependencyTable>,
    grid: Arc<CtuGrid>,
    layout: FrameLayout,
    col_starts: Box<[u32]>,
    row_starts: Box<[u32]>,
    frame: D::Frame,
    progress: Arc<FrameProgress>,
    decode_order: u64,
    failure: OnceLock<FrameFailure>,
    submitted: AtomicBool,
    scheduled_tasks: AtomicUsize,
    scheduled_listeners: AtomicUsize,
    /// 各进度类型已整行完成的 CTU 行数, 同时保护完成等待
    rows_done: Mutex<[u32; ProgressKind::COUNT]>,
    cond: Condvar,
}

impl<D: CtuDecoder> FrameThread<D> {
    fn new(
        executor: ExecutorHandle<CtuRunner<D>>,
        deps: Arc<DependencyTable>,
        grid: Arc<CtuGrid>,
        layout: FrameLayout,
        frame: D::Frame,
        progress: Arc<FrameProgress>,
        decode_order: u64,
    ) -> Self {
        grid.reset();
        let thread = Self {
            decoder: Arc::clone(executor.callbacks().decoder()),
            executor,
            deps,
            grid,
            col_starts: layout.tile_column_starts(),
            row_starts: layout.tile_row_starts(),
            layout,
            frame,
            progress,
            decode_order,
            failure: OnceLock::new(),
            submitted: AtomicBool::new(false),
            scheduled_tasks: AtomicUsize::new(0),
            scheduled_listeners: AtomicUsize::new(0),
            rows_done: Mutex::new([0; ProgressKind::COUNT]),
            cond: Condvar::new(),
        };
        thread.presatisfy_border();
        thread
    }

    fn lock_rows(&self) -> MutexGuard<'_, [u32; ProgressKind::COUNT]> {
        self.rows_done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 帧外一圈虚拟 CTU 视为已完成全部阶段, 预先为帧内邻居加分
    ///
    /// 只加分不提交, 此后每个帧内 CTU 的目标都能被恰好凑满.
    fn presatisfy_border(&self) {
        let w = i64::from(self.grid.width);
        let h = i64::from(self.grid.height);
        let ring = (-1..=w)
            .flat_map(|x| [(x, -1), (x, h)])
            .chain((0..h).flat_map(|y| [(-1, y), (w, y)]));
        for (x, y) in ring {
            for stage in Stage::RUNNABLE {
                for dep in self.deps.successors(stage) {
                    let tx = x + i64::from(dep.dx);
                    let ty = y + i64::from(dep.dy);
                    if let Some(task) = self.grid.get(tx, ty) {
                        task.add_score(dep.stage);
                    }
                }
            }
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.get().is_some()
    }

    fn is_idle(&self) -> bool {
        self.scheduled_tasks.load(Ordering::Acquire) == 0
            && self.scheduled_listeners.load(Ordering::Acquire) == 0
    }

    fn is_first_col(&self, rx: u32) -> bool {
        self.col_starts.get(rx as usize) == Some(&rx)
    }

    /// 对 WPP 而言, tile 首行或与上方 CTU 不在同一 slice 的行都是首行
    fn is_first_row(&self, rx: u32, ry: u32) -> bool {
        if self.row_starts.get(ry as usize) == Some(&ry) {
            return true;
        }
        let slice_at = |y: u32| {
            self.grid
                .get(i64::from(rx), i64::from(y))
                .and_then(CtuTask::slice)
        };
        slice_at(ry) != slice_at(ry - 1)
    }

    /// 阶段的目标分数 (不含自身上一阶段的 +1)
    fn target(&self, task: &CtuTask, stage: Stage) -> u8 {
        match stage {
            Stage::Init => 0,
            // 入口点或前一个 CTU + 同位帧运动矢量 + WPP 上方 CTU, 有 init 阶段时再 +1
            Stage::Parse => {
                let wpp = self.layout.wpp && !self.is_first_row(task.rx, task.ry);
                1 + u8::from(wpp) + u8::from(task.has_init())
            }
            Stage::InterPredict => task.inter_target(),
            stage => self.deps.target(stage),
        }
    }

    fn is_ready(&self, task: &CtuTask, stage: Stage, score: u8) -> bool {
        let target = self.target(task, stage);
        assert!(
            score <= target + 1,
            "frame {}, CTU ({}, {}) 阶段 {} 分数 {} 超过目标 {}",
            self.decode_order,
            task.rx,
            task.ry,
            stage,
            score,
            target + 1
        );
        score == target + 1
    }

    fn add_task(self: &Arc<Self>, task: &CtuTask) {
        self.scheduled_tasks.fetch_add(1, Ordering::AcqRel);
        self.executor.execute(Some(CtuJob {
            frame: Arc::clone(self),
            rs: task.rs,
        }));
    }

    /// 为 (x, y) 的 `stage` 加一分, 帧外坐标忽略
    fn add_score(self: &Arc<Self>, x: i64, y: i64, stage: Stage) {
        let Some(task) = self.grid.get(x, y) else {
            return;
        };
        let score = task.add_score(stage);
        if self.is_ready(task, stage, score) {
            assert_eq!(
                task.stage(),
                stage,
                "frame {}, CTU ({}, {}) 就绪阶段与当前阶段不一致",
                self.decode_order,
                task.rx,
                task.ry
            );
            self.add_task(task);
        }
    }

    fn add_listener(
        self: &Arc<Self>,
        reference: &FrameProgress,
        task: &CtuTask,
        kind: ProgressKind,
        y: i32,
        stage: Stage,
    ) {
        self.scheduled_listeners.fetch_add(1, Ordering::AcqRel);
        let frame = Arc::clone(self);
        let (rx, ry) = (task.rx, task.ry);
        reference.add_listener(ProgressListener::new(kind, y, move || {
            frame.add_score(i64::from(rx), i64::from(ry), stage);
            frame.scheduled_done(&frame.scheduled_listeners);
        }));
    }

    fn scheduled_done(&self, counter: &AtomicUsize) {
        if counter.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _rows = self.lock_rows();
            self.cond.notify_all();
        }
    }

    fn run(self: &Arc<Self>, rs: u32, local: &mut D::Local) {
        if let Some(task) = self.grid.task(rs) {
            while let Step::Continue(stage) = self.run_stage(task, local) {
                trace!(
                    "frame {}, CTU ({}, {}) 直接继续 {}",
                    self.decode_order, task.rx, task.ry, stage
                );
            }
        }
        self.scheduled_done(&self.scheduled_tasks);
    }

    fn run_stage(self: &Arc<Self>, task: &CtuTask, local: &mut D::Local) -> Step {
        if self.is_failed() {
            return Step::Yield;
        }
        let stage = task.stage();
        let ctx = StageTask {
            frame: self,
            task,
            stage,
        };
        if let Err(err) = self.decoder.run_stage(&ctx, local) {
            self.latch_failure(task, stage, err);
            return Step::Yield;
        }
        self.stage_done(task, stage);
        self.advance(task, stage)
    }

    fn latch_failure(&self, task: &CtuTask, stage: Stage, err: TaoError) {
        let error = Arc::new(err);
        let failure = FrameFailure::Stage {
            stage,
            x: task.rx,
            y: task.ry,
            error: Arc::clone(&error),
        };
        if self.failure.set(failure).is_ok() {
            error!(
                "frame {:5}, {}({:3}, {:3}) 失败: {}",
                self.decode_order, stage, task.rx, task.ry, error
            );
        } else {
            warn!(
                "frame {:5}, {}({:3}, {:3}) 失败 (已有更早的错误): {}",
                self.decode_order, stage, task.rx, task.ry, error
            );
        }
    }

    /// 阶段完成: 为依赖它的邻居加分, 并处理调度器自身负责的后续工作
    fn stage_done(self: &Arc<Self>, task: &CtuTask, stage: Stage) {
        let (rx, ry) = (i64::from(task.rx), i64::from(task.ry));
        for dep in self.deps.successors(stage) {
            self.add_score(rx + i64::from(dep.dx), ry + i64::from(dep.dy), dep.stage);
        }

        match stage {
            Stage::Parse => {
                self.schedule_next_parse(task);
                if !task.defers_motion() {
                    self.report_row(task.ry, ProgressKind::Motion);
                }
            }
            Stage::InterPredict if task.defers_motion() => {
                self.report_row(task.ry, ProgressKind::Motion);
            }
            Stage::Alf => self.report_row(task.ry, ProgressKind::Pixel),
            _ => {}
        }
    }

    /// 推进到下一阶段
    ///
    /// 先假定自身这一分已到位: 满足目标就在当前线程继续, 不经过执行器.
    fn advance(self: &Arc<Self>, task: &CtuTask, finished: Stage) -> Step {
        let next = finished.next();
        task.set_stage(next);
        if next == Stage::Done {
            return Step::Yield;
        }
        if self.is_ready(task, next, task.score(next) + 1) {
            return Step::Continue(next);
        }
        self.add_score(i64::from(task.rx), i64::from(task.ry), next);
        Step::Yield
    }

    fn schedule_next_parse(self: &Arc<Self>, task: &CtuTask) {
        let (rx, ry) = (task.rx, task.ry);
        if self.layout.wpp && ry + 1 < self.grid.height && !self.is_first_row(rx, ry + 1) {
            self.add_score(i64::from(rx), i64::from(ry + 1), Stage::Parse);
        }

        let Some(slice) = task
            .slice()
            .and_then(|slice| self.layout.slices.get(slice as usize))
        else {
            return;
        };
        let Some(entry) = slice.entry_points.get(task.entry() as usize) else {
            return;
        };
        let next = task.ctu_idx() as usize + 1;
        if next < entry.end {
            let rs = slice.ctu_addrs[next];
            self.add_score(
                i64::from(rs % self.grid.width),
                i64::from(rs / self.grid.width),
                Stage::Parse,
            );
        }
    }

    /// 第 `ry` 行完成一个 CTU, 整行完成时推进帧进度
    fn report_row(&self, ry: u32, kind: ProgressKind) {
        if self.grid.mark_row(ry, kind) != self.grid.width {
            return;
        }
        let rows = {
            let mut done = self.lock_rows();
            let k = kind.index();
            let old = done[k];
            while done[k] < self.grid.height && self.grid.is_row_done(done[k], kind) {
                done[k] += 1;
            }
            if done[k] == old {
                return;
            }
            done[k]
        };

        // 监听器可能获取其它帧的锁, 必须在释放本帧锁之后报告
        let y = if rows == self.grid.height {
            FrameProgress::FINISHED
        } else {
            i32::try_from(u64::from(rows) << self.layout.ctu_log2_size)
                .unwrap_or(FrameProgress::FINISHED)
        };
        trace!(
            "frame {}, {:?} 进度 {} 行 ({})",
            self.decode_order, kind, rows, y
        );
        self.progress.report(kind, y);
    }

    /// 给每个 CTU 记录所属 slice 与入口点, 同时检查覆盖关系
    fn assign_slices(&self) -> TaoResult<()> {
        for (si, slice) in self.layout.slices.iter().enumerate() {
            for (ei, entry) in slice.entry_points.iter().enumerate() {
                if entry.start > entry.end || entry.end > slice.ctu_addrs.len() {
                    return Err(TaoError::InvalidData(format!(
                        "slice {si} 入口点 {ei} 区间 {entry:?} 越界"
                    )));
                }
                for idx in entry.clone() {
                    let rs = slice.ctu_addrs[idx];
                    let Some(task) = self.grid.task(rs) else {
                        return Err(TaoError::InvalidData(format!(
                            "slice {si} CTU 地址 {rs} 超出帧范围"
                        )));
                    };
                    if !task.assign(si as u32, ei as u32, idx as u32) {
                        return Err(TaoError::InvalidData(format!(
                            "CTU ({}, {}) 同时属于多个 slice",
                            task.rx, task.ry
                        )));
                    }
                }
            }
        }
        if let Some(task) = self.grid.tasks().find(|task| task.slice().is_none()) {
            return Err(TaoError::InvalidData(format!(
                "CTU ({}, {}) 不属于任何 slice",
                task.rx, task.ry
            )));
        }
        Ok(())
    }

    /// 同位帧运动矢量依赖: 只在每个 tile 的首列登记监听器, 其余 CTU 直接满足
    fn check_collocated(self: &Arc<Self>, task: &CtuTask) {
        if let Some(collocated) = &self.layout.collocated {
            if self.is_first_col(task.rx) {
                // 需要同位帧当前 CTU 行的下方与右方, 所以 y 不减一
                let y = i32::try_from(u64::from(task.ry) << self.layout.ctu_log2_size)
                    .unwrap_or(FrameProgress::FINISHED);
                self.add_listener(collocated, task, ProgressKind::Motion, y, Stage::Parse);
                return;
            }
        }
        self.add_score(i64::from(task.rx), i64::from(task.ry), Stage::Parse);
    }

    fn submit(self: &Arc<Self>) -> TaoResult<()> {
        if self.submitted.swap(true, Ordering::AcqRel) {
            return Err(TaoError::InvalidArgument(format!(
                "frame {} 已提交",
                self.decode_order
            )));
        }
        if let Err(err) = self.assign_slices() {
            error!("frame {} 布局无效: {}", self.decode_order, err);
            let msg = match &err {
                TaoError::InvalidData(msg) => msg.clone(),
                other => other.to_string(),
            };
            // 新帧不会有更早的错误
            let _ = self.failure.set(FrameFailure::Layout(msg));
            self.progress.report_finished();
            return Err(err);
        }
        debug!(
            "frame {} 提交: {}x{} CTU, {} slice, wpp {}",
            self.decode_order,
            self.grid.width,
            self.grid.height,
            self.layout.slices.len(),
            self.layout.wpp
        );

        self.add_score(0, 0, Stage::Init);
        for task in self.grid.tasks() {
            self.check_collocated(task);
        }
        for slice in &self.layout.slices {
            for entry in slice.entry_points.iter().filter(|entry| !entry.is_empty()) {
                let rs = slice.ctu_addrs[entry.start];
                self.add_score(
                    i64::from(rs % self.grid.width),
                    i64::from(rs / self.grid.width),
                    Stage::Parse,
                );
            }
        }
        Ok(())
    }

    fn wait(&self) -> TaoResult<()> {
        {
            let mut rows = self.lock_rows();
            while !self.is_idle() {
                rows = self.cond.wait(rows).unwrap_or_else(PoisonError::into_inner);
            }
        }
        // 出错的帧不会自然到达终点, 在这里统一放行所有等待它的帧
        self.progress.report_finished();
        if let Some(failure) = self.failure.get() {
            return Err(failure.to_error());
        }
        if !self.submitted.load(Ordering::Acquire) {
            return Err(TaoError::InvalidArgument(format!(
                "frame {} 尚未提交",
                self.decode_order
            )));
        }
        // 任务与监听器都已清空却仍有 CTU 没走完, 说明依赖计数本身出了问题
        if let Some(task) = self.first_unfinished() {
            let msg = format!(
                "frame {} 调度停滞: CTU ({}, {}) 停在 {} 阶段",
                self.decode_order,
                task.rx,
                task.ry,
                task.stage()
            );
            error!("{msg}");
            return Err(TaoError::Internal(msg));
        }
        debug!("frame {} 解码完成", self.decode_order);
        Ok(())
    }

    fn first_unfinished(&self) -> Option<&CtuTask> {
        self.grid.tasks().find(|task| task.stage() != Stage::Done)
    }
}

/// 单个帧上下文的调度器
///
/// 一个调度器同一时刻只服务一帧: `init` -> `submit` -> `wait`, 之后可复用于下一帧.
/// 尺寸不变时复用 CTU 任务网格.
pub struct FrameScheduler<D: CtuDecoder> {
    executor: ExecutorHandle<CtuRunner<D>>,
    deps: Arc<DependencyTable>,
    grid: Option<Arc<CtuGrid>>,
    current: Option<Arc<FrameThread<D>>>,
}

impl<D: CtuDecoder> FrameScheduler<D> {
    /// 创建调度器
    pub fn new(executor: &CtuExecutor<D>, deps: Arc<DependencyTable>) -> Self {
        Self {
            executor: executor.handle(),
            deps,
            grid: None,
            current: None,
        }
    }

    /// 为新帧准备调度状态
    ///
    /// 返回新帧的进度对象, 后续帧可以用它登记参考依赖.
    /// 上一帧仍有任务或监听器未完成时返回错误.
    pub fn init(
        &mut self,
        decode_order: u64,
        layout: FrameLayout,
        frame: D::Frame,
    ) -> TaoResult<Arc<FrameProgress>> {
        if let Some(previous) = &self.current {
            if !previous.is_idle() {
                return Err(TaoError::Internal(format!(
                    "frame {} 仍在解码, 帧上下文不能复用",
                    previous.decode_order
                )));
            }
            previous.progress.report_finished();
        }
        layout.validate()?;

        let grid = match &self.grid {
            Some(grid) if grid.matches(layout.ctu_width, layout.ctu_height) => Arc::clone(grid),
            _ => {
                debug!(
                    "分配 CTU 网格 {}x{}",
                    layout.ctu_width, layout.ctu_height
                );
                let grid = Arc::new(CtuGrid::new(layout.ctu_width, layout.ctu_height)?);
                self.grid = Some(Arc::clone(&grid));
                grid
            }
        };

        let progress = Arc::new(FrameProgress::new());
        self.current = Some(Arc::new(FrameThread::new(
            self.executor.clone(),
            Arc::clone(&self.deps),
            grid,
            layout,
            frame,
            Arc::clone(&progress),
            decode_order,
        )));
        Ok(progress)
    }

    fn current(&self) -> TaoResult<&Arc<FrameThread<D>>> {
        self.current
            .as_ref()
            .ok_or_else(|| TaoError::InvalidArgument("帧调度器尚未初始化".into()))
    }

    /// 提交帧: 放出初始化任务、各入口点的首个解析任务与同位帧依赖
    ///
    /// 布局中有 CTU 不属于任何 slice 或属于多个 slice 时返回错误,
    /// 此时帧进度被直接标记为完成, 等待它的帧不会挂起.
    pub fn submit(&self) -> TaoResult<()> {
        self.current()?.submit()
    }

    /// 阻塞等待当前帧的全部任务与监听器完成
    ///
    /// 返回本帧第一个失败阶段的错误. 可重复调用.
    pub fn wait(&self) -> TaoResult<()> {
        match &self.current {
            Some(frame) => frame.wait(),
            None => Ok(()),
        }
    }

    /// 当前帧的解码顺序
    pub fn decode_order(&self) -> Option<u64> {
        self.current.as_ref().map(|frame| frame.decode_order)
    }

    /// 当前帧的进度
    pub fn progress(&self) -> Option<&Arc<FrameProgress>> {
        self.current.as_ref().map(|frame| &frame.progress)
    }

    /// 当前帧数据
    pub fn frame(&self) -> Option<&D::Frame> {
        self.current.as_ref().map(|frame| &frame.frame)
    }

    /// 没有未完成的任务与监听器
    pub fn is_idle(&self) -> bool {
        self.current.as_ref().is_none_or(|frame| frame.is_idle())
    }

    /// 当前帧的每个 CTU 都已走完全部阶段
    pub(crate) fn is_complete(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|frame| frame.first_unfinished().is_none())
    }
}
