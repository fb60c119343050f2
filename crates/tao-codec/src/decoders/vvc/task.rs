//! CTU 任务网格.
//!
//! 整帧的 CTU 任务存放在一块连续内存中, 邻居通过光栅下标计算, 任务之间不互相持有.
//! 网格在尺寸相同的帧之间复用, 每帧开始时只重置计数器.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use tao_core::{TaoError, TaoResult};

use super::progress::ProgressKind;
use super::stage::Stage;

const UNASSIGNED: u32 = u32::MAX;

/// 单个 CTU 的调度状态
///
/// 分数由邻居线程原子累加, 阶段只由当前执行该 CTU 的线程修改.
pub(crate) struct CtuTask {
    pub(crate) rx: u32,
    pub(crate) ry: u32,
    pub(crate) rs: u32,
    stage: AtomicU8,
    score: [AtomicU8; Stage::COUNT],
    /// 帧间预测阶段需要等待的参考块数量, 解析阶段累加
    target_inter: AtomicU8,
    /// 运动矢量在帧间预测 (解码端运动矢量细化) 之后才最终确定
    defer_motion: AtomicBool,
    slice: AtomicU32,
    entry: AtomicU32,
    ctu_idx: AtomicU32,
}

impl CtuTask {
    fn new(rx: u32, ry: u32, rs: u32) -> Self {
        Self {
            rx,
            ry,
            rs,
            stage: AtomicU8::new(Stage::Parse as u8),
            score: Default::default(),
            target_inter: AtomicU8::new(0),
            defer_motion: AtomicBool::new(false),
            slice: AtomicU32::new(UNASSIGNED),
            entry: AtomicU32::new(UNASSIGNED),
            ctu_idx: AtomicU32::new(UNASSIGNED),
        }
    }

    fn reset(&self) {
        let stage = if self.has_init() {
            Stage::Init
        } else {
            Stage::Parse
        };
        self.set_stage(stage);
        for score in &self.score {
            score.store(0, Ordering::Relaxed);
        }
        self.target_inter.store(0, Ordering::Relaxed);
        self.defer_motion.store(false, Ordering::Relaxed);
        self.slice.store(UNASSIGNED, Ordering::Relaxed);
        self.entry.store(UNASSIGNED, Ordering::Relaxed);
        self.ctu_idx.store(UNASSIGNED, Ordering::Relaxed);
    }

    /// 只有光栅序首个 CTU 携带帧级初始化阶段
    pub(crate) fn has_init(&self) -> bool {
        self.rs == 0
    }

    pub(crate) fn stage(&self) -> Stage {
        Stage::from_index(usize::from(self.stage.load(Ordering::Acquire)))
    }

    pub(crate) fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Release);
    }

    pub(crate) fn score(&self, stage: Stage) -> u8 {
        self.score[stage.index()].load(Ordering::Acquire)
    }

    /// 加一分, 返回加分后的分数
    pub(crate) fn add_score(&self, stage: Stage) -> u8 {
        self.score[stage.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn inter_target(&self) -> u8 {
        self.target_inter.load(Ordering::Acquire)
    }

    /// 帧间预测多等待一个参考块, 超出计数范围时返回 false
    pub(crate) fn add_inter_target(&self) -> bool {
        self.target_inter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |target| {
                (target < u8::MAX - 1).then_some(target + 1)
            })
            .is_ok()
    }

    pub(crate) fn defers_motion(&self) -> bool {
        self.defer_motion.load(Ordering::Acquire)
    }

    pub(crate) fn set_defer_motion(&self) {
        self.defer_motion.store(true, Ordering::Release);
    }

    /// 记录所属 slice / 入口点 / slice 内下标, 已被其它 slice 占用时返回 false
    pub(crate) fn assign(&self, slice: u32, entry: u32, ctu_idx: u32) -> bool {
        if self
            .slice
            .compare_exchange(UNASSIGNED, slice, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.entry.store(entry, Ordering::Release);
        self.ctu_idx.store(ctu_idx, Ordering::Release);
        true
    }

    pub(crate) fn slice(&self) -> Option<u32> {
        let slice = self.slice.load(Ordering::Acquire);
        (slice != UNASSIGNED).then_some(slice)
    }

    pub(crate) fn entry(&self) -> u32 {
        self.entry.load(Ordering::Acquire)
    }

    pub(crate) fn ctu_idx(&self) -> u32 {
        self.ctu_idx.load(Ordering::Acquire)
    }
}

/// 每个 CTU 行已完成各进度类型的 CTU 数
#[derive(Default)]
pub(crate) struct RowProgress {
    done: [AtomicU32; ProgressKind::COUNT],
}

/// 一帧的 CTU 任务
pub(crate) struct CtuGrid {
    pub(crate) width: u32,
    pub(crate) height: u32,
    tasks: Box<[CtuTask]>,
    rows: Box<[RowProgress]>,
}

impl CtuGrid {
    /// 分配 `width x height` 的网格, 内存不足时返回错误而不是中止进程
    pub(crate) fn new(width: u32, height: u32) -> TaoResult<Self> {
        let count = width as usize * height as usize;
        let mut tasks = Vec::new();
        tasks
            .try_reserve_exact(count)
            .map_err(|e| TaoError::OutOfMemory(format!("CTU 任务 {count} 个: {e}")))?;
        for rs in 0..width * height {
            tasks.push(CtuTask::new(rs % width, rs / width, rs));
        }

        let mut rows = Vec::new();
        rows.try_reserve_exact(height as usize)
            .map_err(|e| TaoError::OutOfMemory(format!("CTU 行进度 {height} 行: {e}")))?;
        rows.resize_with(height as usize, RowProgress::default);

        Ok(Self {
            width,
            height,
            tasks: tasks.into_boxed_slice(),
            rows: rows.into_boxed_slice(),
        })
    }

    pub(crate) fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// 按坐标取任务, 帧外坐标返回 None
    pub(crate) fn get(&self, x: i64, y: i64) -> Option<&CtuTask> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        self.tasks.get((y * i64::from(self.width) + x) as usize)
    }

    pub(crate) fn task(&self, rs: u32) -> Option<&CtuTask> {
        self.tasks.get(rs as usize)
    }

    pub(crate) fn tasks(&self) -> impl Iterator<Item = &CtuTask> {
        self.tasks.iter()
    }

    /// 新帧开始前重置全部计数器
    pub(crate) fn reset(&self) {
        for task in self.tasks.iter() {
            task.reset();
        }
        for row in self.rows.iter() {
            for done in &row.done {
                done.store(0, Ordering::Relaxed);
            }
        }
    }

    /// 第 `ry` 行完成一个 CTU, 返回该行已完成数
    pub(crate) fn mark_row(&self, ry: u32, kind: ProgressKind) -> u32 {
        self.rows
            .get(ry as usize)
            .map_or(0, |row| row.done[kind.index()].fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub(crate) fn is_row_done(&self, ry: u32, kind: ProgressKind) -> bool {
        self.rows
            .get(ry as usize)
            .is_some_and(|row| row.done[kind.index()].load(Ordering::Acquire) == self.width)
    }
}
