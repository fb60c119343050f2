//! 通用并发任务执行器.
//!
//! 固定数量的工作线程从若干优先级桶中取任务执行: 0 号桶优先级最高, 同一桶内先进先出.
//! 执行器本身不理解任务内容, 任务类型、优先级映射、线程局部上下文与执行逻辑
//! 都由调用方通过 [`TaskCallbacks`] 提供.
//!
//! `thread_count == 0` 时不创建后台线程, [`Executor::execute`] 直接在调用线程上
//! 排空所有可运行任务后返回.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::error::{TaoError, TaoResult};

/// 执行器回调
///
/// 由使用方实现. 执行器通过它创建线程局部上下文并执行任务.
pub trait TaskCallbacks: Send + Sync + 'static {
    /// 任务类型, 入队后由所在队列独占, 执行时按值交给 `run`
    type Task: Send + 'static;

    /// 线程局部上下文, 每个工作线程一份, 在该线程执行的所有任务间复用
    type Local: Send + 'static;

    /// 优先级桶数量, 必须大于 0
    fn priorities(&self) -> usize;

    /// 任务所属优先级桶, 按 `priorities()` 取模
    fn priority(&self, task: &Self::Task) -> usize;

    /// 为一个工作线程创建局部上下文
    fn local_context(&self) -> TaoResult<Self::Local>;

    /// 执行一个任务
    ///
    /// 执行器不解释任务结果, 错误传播由使用方负责.
    fn run(&self, task: Self::Task, local: &mut Self::Local);
}

/// 受调度锁保护的队列状态
struct Queues<T> {
    buckets: Vec<VecDeque<T>>,
    /// 执行器正在销毁
    die: bool,
    /// 同步模式下已有线程在排空队列
    draining: bool,
}

impl<T> Queues<T> {
    /// 按桶序号升序取第一个非空桶的队首任务
    fn pop(&mut self) -> Option<T> {
        self.buckets.iter_mut().find_map(VecDeque::pop_front)
    }

    fn clear(&mut self) {
        self.buckets.iter_mut().for_each(VecDeque::clear);
    }
}

struct Shared<C: TaskCallbacks> {
    callbacks: C,
    thread_count: usize,
    queues: Mutex<Queues<C::Task>>,
    cond: Condvar,
    /// 同步模式的局部上下文, 多线程模式下为 None
    sync_local: Option<Mutex<C::Local>>,
}

impl<C: TaskCallbacks> Shared<C> {
    fn lock_queues(&self) -> MutexGuard<'_, Queues<C::Task>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, task: Option<C::Task>) {
        let mut queues = self.lock_queues();
        if let Some(task) = task {
            let bucket = self.callbacks.priority(&task) % queues.buckets.len();
            queues.buckets[bucket].push_back(task);
        }

        let Some(local) = self.sync_local.as_ref() else {
            self.cond.notify_one();
            return;
        };

        // 任务内部再次调用 execute 时只入队, 由外层循环继续排空
        if queues.draining {
            return;
        }
        queues.draining = true;
        drop(queues);

        let mut local = local.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let task = {
                let mut queues = self.lock_queues();
                match queues.pop() {
                    Some(task) => task,
                    None => {
                        queues.draining = false;
                        return;
                    }
                }
            };
            self.run(task, &mut local);
        }
    }

    fn run(&self, task: C::Task, local: &mut C::Local) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.callbacks.run(task, local)));
        if result.is_err() {
            // 任务计数已不可信, 继续运行只会让等待方永久挂起
            error!(
                "执行器任务 panic, 线程 {:?}, 进程中止",
                thread::current().name()
            );
            std::process::abort();
        }
    }
}

fn worker_main<C: TaskCallbacks>(shared: Arc<Shared<C>>, mut local: C::Local) {
    let mut queues = shared.lock_queues();
    while !queues.die {
        match queues.pop() {
            Some(task) => {
                // 执行期间释放调度锁, 其它线程可继续入队和取任务
                drop(queues);
                shared.run(task, &mut local);
                queues = shared.lock_queues();
            }
            None => {
                queues = shared
                    .cond
                    .wait(queues)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

/// 执行器句柄
///
/// 可克隆, 供任务在执行过程中继续提交任务. 不拥有工作线程.
pub struct ExecutorHandle<C: TaskCallbacks> {
    shared: Arc<Shared<C>>,
}

impl<C: TaskCallbacks> Clone for ExecutorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TaskCallbacks> ExecutorHandle<C> {
    /// 提交任务
    ///
    /// - `Some(task)`: 放入 `priority % priorities` 号桶
    /// - `None`: 不入队, 仅唤醒一个空闲线程重新检查队列
    ///
    /// 同步模式下返回前会执行完所有可运行任务 (包括执行期间新提交的任务).
    pub fn execute(&self, task: Option<C::Task>) {
        self.shared.execute(task);
    }

    /// 获取执行器回调
    pub fn callbacks(&self) -> &C {
        &self.shared.callbacks
    }

    /// 后台工作线程数, 0 表示同步模式
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count
    }
}

/// 并发任务执行器
///
/// 拥有全部工作线程. drop 时通知线程退出并等待回收, 调用方需保证此后不再提交任务.
pub struct Executor<C: TaskCallbacks> {
    handle: ExecutorHandle<C>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: TaskCallbacks> Executor<C> {
    /// 创建执行器
    ///
    /// # 参数
    /// - `callbacks`: 任务回调
    /// - `thread_count`: 工作线程数, 0 表示同步模式
    ///
    /// 任一线程或局部上下文创建失败时, 已启动的线程会被回收后返回错误.
    pub fn new(callbacks: C, thread_count: usize) -> TaoResult<Self> {
        let priorities = callbacks.priorities();
        if priorities == 0 {
            return Err(TaoError::InvalidArgument(
                "执行器优先级桶数量必须大于 0".into(),
            ));
        }

        let sync_local = if thread_count == 0 {
            Some(Mutex::new(callbacks.local_context()?))
        } else {
            None
        };
        let shared = Arc::new(Shared {
            callbacks,
            thread_count,
            queues: Mutex::new(Queues {
                buckets: (0..priorities).map(|_| VecDeque::new()).collect(),
                die: false,
                draining: false,
            }),
            cond: Condvar::new(),
            sync_local,
        });

        let mut executor = Self {
            handle: ExecutorHandle {
                shared: Arc::clone(&shared),
            },
            workers: Vec::with_capacity(thread_count),
        };
        for index in 0..thread_count {
            // 失败时 executor 随 `?` 被 drop, 已启动线程在 Drop 中回收
            let local = shared.callbacks.local_context()?;
            let worker_shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name(format!("tao-worker-{index}"))
                .spawn(move || worker_main(worker_shared, local))?;
            executor.workers.push(worker);
        }

        info!(
            "执行器已创建: 线程数 {}, 优先级桶 {}",
            thread_count, priorities
        );
        Ok(executor)
    }

    /// 提交任务, 语义同 [`ExecutorHandle::execute`]
    pub fn execute(&self, task: Option<C::Task>) {
        self.handle.execute(task);
    }

    /// 获取可克隆的执行器句柄
    pub fn handle(&self) -> ExecutorHandle<C> {
        self.handle.clone()
    }

    /// 获取执行器回调
    pub fn callbacks(&self) -> &C {
        self.handle.callbacks()
    }

    /// 后台工作线程数, 0 表示同步模式
    pub fn thread_count(&self) -> usize {
        self.handle.thread_count()
    }
}

impl<C: TaskCallbacks> Drop for Executor<C> {
    fn drop(&mut self) {
        let shared = &self.handle.shared;
        {
            let mut queues = shared.lock_queues();
            queues.die = true;
            shared.cond.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // 残留任务可能持有指回执行器的句柄, 清空以断开引用环
        shared.lock_queues().clear();
        debug!("执行器已销毁");
    }
}
