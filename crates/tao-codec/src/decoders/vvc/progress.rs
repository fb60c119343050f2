//! 跨帧解码进度.
//!
//! 每个解码中的图像持有一个 [`FrameProgress`], 记录运动矢量与像素已经可用到哪一行
//! (像素单位). 其它帧通过注册 [`ProgressListener`] 表达 "参考帧解码到第 y 行之后才能继续",
//! 进度越过 y 时由报告进度的线程调用监听器, 每个监听器恰好触发一次.

use std::fmt;
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// 进度类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    /// 运动矢量可用 (供时域运动矢量预测使用)
    Motion = 0,
    /// 重建像素可用 (供帧间预测使用)
    Pixel = 1,
}

impl ProgressKind {
    /// 进度类型数量
    pub const COUNT: usize = 2;

    /// 全部进度类型
    pub const ALL: [ProgressKind; ProgressKind::COUNT] = [ProgressKind::Motion, ProgressKind::Pixel];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// 进度监听器
///
/// 回调在报告进度的线程中执行 (注册时进度已满足则在注册线程中执行),
/// 不能假设任何特定线程身份. 回调被消费后不会再次触发.
pub struct ProgressListener {
    kind: ProgressKind,
    y: i32,
    notify: Box<dyn FnOnce() + Send>,
}

impl ProgressListener {
    /// 创建监听器, 当 `kind` 进度超过第 `y` 行时调用 `notify`
    pub fn new(kind: ProgressKind, y: i32, notify: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            y,
            notify: Box::new(notify),
        }
    }

    /// 监听的进度类型
    pub fn kind(&self) -> ProgressKind {
        self.kind
    }

    /// 需要越过的行
    pub fn y(&self) -> i32 {
        self.y
    }

    fn is_done(&self, progress: i32) -> bool {
        progress == i32::MAX || progress > self.y
    }

    fn fire(self) {
        (self.notify)();
    }
}

impl fmt::Debug for ProgressListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressListener")
            .field("kind", &self.kind)
            .field("y", &self.y)
            .finish_non_exhaustive()
    }
}

struct ProgressState {
    progress: [i32; ProgressKind::COUNT],
    listeners: [Vec<ProgressListener>; ProgressKind::COUNT],
}

/// 单幅图像的解码进度
pub struct FrameProgress {
    state: Mutex<ProgressState>,
    cond: Condvar,
}

impl Default for FrameProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FrameProgress")
            .field("progress", &state.progress)
            .field(
                "pending",
                &[state.listeners[0].len(), state.listeners[1].len()],
            )
            .finish()
    }
}

impl FrameProgress {
    /// 完成值, 表示整帧可用
    pub const FINISHED: i32 = i32::MAX;

    /// 创建进度为 0 的新进度对象
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState {
                progress: [0; ProgressKind::COUNT],
                listeners: Default::default(),
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前进度 (像素行), 完成时为 [`FrameProgress::FINISHED`]
    pub fn get(&self, kind: ProgressKind) -> i32 {
        self.lock().progress[kind.index()]
    }

    /// 所有进度类型都已完成
    pub fn is_finished(&self) -> bool {
        self.lock()
            .progress
            .iter()
            .all(|&progress| progress == Self::FINISHED)
    }

    /// 尚未触发的监听器数量
    pub fn pending_listeners(&self) -> usize {
        self.lock().listeners.iter().map(Vec::len).sum()
    }

    /// 报告进度
    ///
    /// 进度只增不减, 小于等于当前值的报告被忽略. 到期的监听器在释放锁之后
    /// 于当前线程依次触发, 因此回调内可以安全地获取其它帧的锁.
    pub fn report(&self, kind: ProgressKind, y: i32) {
        let due = {
            let mut state = self.lock();
            let k = kind.index();
            if state.progress[k] >= y {
                return;
            }
            state.progress[k] = y;
            self.cond.notify_all();

            let (due, pending): (Vec<_>, Vec<_>) = mem::take(&mut state.listeners[k])
                .into_iter()
                .partition(|listener| listener.is_done(y));
            state.listeners[k] = pending;
            due
        };
        for listener in due {
            listener.fire();
        }
    }

    /// 标记整帧完成, 触发所有剩余监听器
    pub fn report_finished(&self) {
        for kind in ProgressKind::ALL {
            self.report(kind, Self::FINISHED);
        }
    }

    /// 注册监听器, 进度已满足时立即在当前线程触发
    pub fn add_listener(&self, listener: ProgressListener) {
        let mut state = self.lock();
        let k = listener.kind.index();
        if listener.is_done(state.progress[k]) {
            drop(state);
            listener.fire();
        } else {
            state.listeners[k].push(listener);
        }
    }

    /// 阻塞等待 `kind` 进度超过第 `y` 行
    pub fn wait_for(&self, kind: ProgressKind, y: i32) {
        let k = kind.index();
        let mut state = self.lock();
        while !(state.progress[k] == Self::FINISHED || state.progress[k] > y) {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
