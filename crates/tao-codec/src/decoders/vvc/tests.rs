use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use tao_core::{Executor, TaoError, TaoResult};

use super::{
    CtuDecoder, CtuExecutor, CtuRunner, DependencyTable, FrameLayout, FrameProgress,
    FrameScheduler, SliceLayout, Stage, StageTask,
};

/// 每个阶段被执行的时间戳 (全局递增序号)
type StampKey = (u64, u32, u32, Stage);

#[derive(Default)]
struct TestFrame {
    faults: Vec<(u32, u32, Stage)>,
    barrier: Option<Arc<Barrier>>,
    /// 每个 CTU 的帧间预测都依赖这些参考帧的同一 CTU 行
    references: Vec<Arc<FrameProgress>>,
    defer_motion: bool,
    /// 在重建阶段调用只允许在解析阶段调用的接口
    misuse: bool,
}

#[derive(Default)]
struct Recorder {
    clock: AtomicU64,
    stamps: Mutex<HashMap<StampKey, u64>>,
    duplicates: AtomicUsize,
}

impl Recorder {
    fn count(&self) -> usize {
        self.stamps.lock().unwrap().len()
    }

    fn ran(&self, order: u64, x: u32, y: u32, stage: Stage) -> bool {
        self.stamps
            .lock()
            .unwrap()
            .contains_key(&(order, x, y, stage))
    }

    fn stamp(&self, order: u64, x: u32, y: u32, stage: Stage) -> u64 {
        match self.stamps.lock().unwrap().get(&(order, x, y, stage)) {
            Some(&stamp) => stamp,
            None => panic!("frame {order}, {stage}({x}, {y}) 未执行"),
        }
    }
}

impl CtuDecoder for Recorder {
    type Frame = TestFrame;
    type Local = u64;

    fn local_context(&self) -> TaoResult<u64> {
        Ok(0)
    }

    fn run_stage(&self, task: &StageTask<'_, Self>, local: &mut u64) -> TaoResult<()> {
        *local += 1;
        let key = (task.decode_order(), task.x(), task.y(), task.stage());
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst);
        if self.stamps.lock().unwrap().insert(key, stamp).is_some() {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }

        let frame = task.frame();
        match task.stage() {
            Stage::Parse => {
                let bottom = ((task.y() + 1) << task.ctu_log2_size()) as i32 - 1;
                for reference in &frame.references {
                    task.wait_for_reference(reference, bottom)?;
                }
                if frame.defer_motion {
                    task.defer_motion_progress()?;
                }
            }
            Stage::Reconstruct if frame.misuse => {
                task.wait_for_reference(&FrameProgress::new(), 0)?;
            }
            _ => {}
        }

        if frame.faults.contains(&(task.x(), task.y(), task.stage())) {
            if let Some(barrier) = &frame.barrier {
                barrier.wait();
            }
            return Err(TaoError::InvalidData(format!(
                "注入错误 {}({}, {})",
                task.stage(),
                task.x(),
                task.y()
            )));
        }
        Ok(())
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn executor(recorder: &Arc<Recorder>, threads: usize) -> CtuExecutor<Recorder> {
    Executor::new(CtuRunner::new(Arc::clone(recorder)), threads).unwrap()
}

fn decode_one(
    threads: usize,
    layout: FrameLayout,
    deps: DependencyTable,
    frame: TestFrame,
) -> (Arc<Recorder>, TaoResult<()>) {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, threads);
    let mut scheduler = FrameScheduler::new(&executor, Arc::new(deps));
    scheduler.init(0, layout, frame).unwrap();
    scheduler.submit().unwrap();
    let result = scheduler.wait();
    if result.is_ok() {
        assert!(scheduler.is_complete(), "wait 成功但仍有 CTU 未完成");
    }
    (recorder, result)
}

/// 每个 CTU 的各阶段按顺序执行
fn assert_stage_order(recorder: &Recorder, order: u64, width: u32, height: u32) {
    for y in 0..height {
        for x in 0..width {
            let mut last = None;
            for stage in Stage::RUNNABLE {
                if stage == Stage::Init && (x, y) != (0, 0) {
                    continue;
                }
                let stamp = recorder.stamp(order, x, y, stage);
                if let Some(last) = last {
                    assert!(stamp > last, "{stage}({x}, {y}) 早于上一阶段");
                }
                last = Some(stamp);
            }
        }
    }
}

/// 依赖表中的每条帧内边都被遵守
fn assert_table_respected(
    recorder: &Recorder,
    deps: &DependencyTable,
    order: u64,
    width: u32,
    height: u32,
) {
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            for stage in Stage::RUNNABLE {
                for dep in deps.successors(stage) {
                    let (tx, ty) = (x + dep.dx, y + dep.dy);
                    if tx < 0 || ty < 0 || tx >= width as i32 || ty >= height as i32 {
                        continue;
                    }
                    let before = recorder.stamp(order, x as u32, y as u32, stage);
                    let after = recorder.stamp(order, tx as u32, ty as u32, dep.stage);
                    assert!(
                        before < after,
                        "{}({tx}, {ty}) 早于 {stage}({x}, {y})",
                        dep.stage
                    );
                }
            }
        }
    }
}

#[test]
fn test_every_stage_runs_once_for_small_grids() {
    let sizes = [(1, 1), (1, 4), (4, 1), (2, 2), (3, 4), (5, 4)];
    for (width, height) in sizes {
        for threads in [0, 4] {
            for wpp in [false, true] {
                let deps = DependencyTable::vvc();
                let layout = FrameLayout::raster(width, height, 5, wpp);
                let (recorder, result) =
                    decode_one(threads, layout, deps.clone(), TestFrame::default());
                result.unwrap();

                assert_eq!(recorder.duplicates.load(Ordering::SeqCst), 0);
                assert_eq!(
                    recorder.count(),
                    (width * height) as usize * (Stage::COUNT - 1) + 1,
                    "{width}x{height}, threads {threads}, wpp {wpp}"
                );
                assert_stage_order(&recorder, 0, width, height);
                assert_table_respected(&recorder, &deps, 0, width, height);
            }
        }
    }
}

#[test]
fn test_parse_follows_entry_points() {
    // 非 WPP: 单入口点内严格按光栅序解析
    let (recorder, result) = decode_one(
        4,
        FrameLayout::raster(4, 3, 5, false),
        DependencyTable::vvc(),
        TestFrame::default(),
    );
    result.unwrap();
    let stamps: Vec<u64> = (0..12)
        .map(|rs| recorder.stamp(0, rs % 4, rs / 4, Stage::Parse))
        .collect();
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));

    // WPP: 每行依赖左侧与正上方 CTU
    let (recorder, result) = decode_one(
        4,
        FrameLayout::raster(4, 3, 5, true),
        DependencyTable::vvc(),
        TestFrame::default(),
    );
    result.unwrap();
    for y in 0..3 {
        for x in 0..4 {
            let parse = recorder.stamp(0, x, y, Stage::Parse);
            if x > 0 {
                assert!(recorder.stamp(0, x - 1, y, Stage::Parse) < parse);
            }
            if y > 0 {
                assert!(recorder.stamp(0, x, y - 1, Stage::Parse) < parse);
            }
        }
    }
}

#[test]
fn test_multiple_slices_and_tiles() {
    let deps = DependencyTable::vvc();
    let mut layout = FrameLayout::raster_slices(4, 6, 5, true, 3);
    layout.tile_rows = vec![0, 3];
    let (recorder, result) = decode_one(3, layout, deps.clone(), TestFrame::default());
    result.unwrap();
    assert_eq!(recorder.count(), 24 * (Stage::COUNT - 1) + 1);
    assert_stage_order(&recorder, 0, 4, 6);
    assert_table_respected(&recorder, &deps, 0, 4, 6);
}

#[test]
fn test_trivial_table_on_4x4() {
    let mut deps = DependencyTable::new();
    for stage in Stage::RUNNABLE {
        if !stage.is_scheduler_driven() {
            deps = deps
                .add(stage, 1, 0, stage)
                .unwrap()
                .add(stage, 0, 1, stage)
                .unwrap();
        }
    }
    let (recorder, result) = decode_one(
        4,
        FrameLayout::raster(4, 4, 6, false),
        deps.clone(),
        TestFrame::default(),
    );
    result.unwrap();
    assert_eq!(recorder.count(), 16 * (Stage::COUNT - 1) + 1);
    assert_eq!(recorder.duplicates.load(Ordering::SeqCst), 0);
    assert_stage_order(&recorder, 0, 4, 4);
    assert_table_respected(&recorder, &deps, 0, 4, 4);
}

#[test]
fn test_stage_failure_stops_ctu_and_is_reported() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, 2);
    let mut scheduler = FrameScheduler::new(&executor, Arc::new(DependencyTable::vvc()));
    let frame = TestFrame {
        faults: vec![(1, 1, Stage::Reconstruct)],
        ..TestFrame::default()
    };
    let progress = scheduler
        .init(7, FrameLayout::raster(3, 3, 5, false), frame)
        .unwrap();
    scheduler.submit().unwrap();

    for _ in 0..2 {
        match scheduler.wait() {
            Err(TaoError::StageFailed { stage, x, y, source }) => {
                assert_eq!((stage, x, y), ("recon", 1, 1));
                assert!(matches!(*source, TaoError::InvalidData(_)));
            }
            other => panic!("期望阶段错误, 实际 {other:?}"),
        }
    }
    assert!(recorder.ran(7, 1, 1, Stage::Reconstruct));
    assert!(!recorder.ran(7, 1, 1, Stage::Reshape));
    // 依赖 (1, 1) 重建的邻居也不会完成
    assert!(!recorder.ran(7, 2, 2, Stage::Alf));
    assert!(progress.is_finished());
    assert!(scheduler.is_idle());
}

#[test]
fn test_first_failure_wins_in_sync_mode() {
    let frame = TestFrame {
        faults: vec![(0, 0, Stage::Parse), (0, 2, Stage::Parse)],
        ..TestFrame::default()
    };
    let (recorder, result) = decode_one(
        0,
        FrameLayout::raster_slices(4, 4, 5, false, 2),
        DependencyTable::vvc(),
        frame,
    );
    match result {
        Err(TaoError::StageFailed { stage, x, y, .. }) => {
            assert_eq!((stage, x, y), ("parse", 0, 0));
        }
        other => panic!("期望阶段错误, 实际 {other:?}"),
    }
    // 第二个 slice 的解析任务出队时帧已失败, 不再执行
    assert!(!recorder.ran(0, 0, 2, Stage::Parse));
    assert!(!recorder.ran(0, 1, 0, Stage::Parse));
}

#[test]
fn test_simultaneous_failures_report_exactly_one() {
    let frame = TestFrame {
        faults: vec![(0, 0, Stage::Parse), (0, 2, Stage::Parse)],
        barrier: Some(Arc::new(Barrier::new(2))),
        ..TestFrame::default()
    };
    let (recorder, result) = decode_one(
        4,
        FrameLayout::raster_slices(4, 4, 5, false, 2),
        DependencyTable::vvc(),
        frame,
    );
    match result {
        Err(TaoError::StageFailed { stage, x, y, .. }) => {
            assert_eq!(stage, "parse");
            assert!((x, y) == (0, 0) || (x, y) == (0, 2), "({x}, {y})");
        }
        other => panic!("期望阶段错误, 实际 {other:?}"),
    }
    assert!(recorder.ran(0, 0, 0, Stage::Parse));
    assert!(recorder.ran(0, 0, 2, Stage::Parse));
    assert!(!recorder.ran(0, 0, 0, Stage::DeblockStrength));
}

#[test]
fn test_reference_api_is_parse_only() {
    let frame = TestFrame {
        misuse: true,
        ..TestFrame::default()
    };
    let (_recorder, result) = decode_one(
        0,
        FrameLayout::raster(2, 2, 5, false),
        DependencyTable::vvc(),
        frame,
    );
    match result {
        Err(TaoError::StageFailed { stage, source, .. }) => {
            assert_eq!(stage, "recon");
            assert!(matches!(*source, TaoError::InvalidArgument(_)));
        }
        other => panic!("期望阶段错误, 实际 {other:?}"),
    }
}

#[test]
fn test_wait_is_idempotent() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, 3);
    let mut scheduler = FrameScheduler::new(&executor, Arc::new(DependencyTable::vvc()));
    let progress = scheduler
        .init(0, FrameLayout::raster(3, 2, 5, true), TestFrame::default())
        .unwrap();
    scheduler.submit().unwrap();
    scheduler.wait().unwrap();
    let count = recorder.count();
    scheduler.wait().unwrap();
    assert_eq!(recorder.count(), count);
    assert!(progress.is_finished());
}

#[test]
fn test_cross_frame_dependencies() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, 3);
    let deps = Arc::new(DependencyTable::vvc());
    let mut first = FrameScheduler::new(&executor, Arc::clone(&deps));
    let mut second = FrameScheduler::new(&executor, Arc::clone(&deps));
    let (width, height) = (3, 5);

    let reference = first
        .init(
            0,
            FrameLayout::raster(width, height, 5, false),
            TestFrame {
                defer_motion: true,
                ..TestFrame::default()
            },
        )
        .unwrap();
    first.submit().unwrap();

    let layout = FrameLayout::raster(width, height, 5, true).with_collocated(Arc::clone(&reference));
    second
        .init(
            1,
            layout,
            TestFrame {
                references: vec![Arc::clone(&reference)],
                ..TestFrame::default()
            },
        )
        .unwrap();
    second.submit().unwrap();

    first.wait().unwrap();
    second.wait().unwrap();
    assert_stage_order(&recorder, 1, width, height);

    for y in 0..height {
        let rows_above = |stage: Stage| {
            (0..=y)
                .flat_map(|ry| (0..width).map(move |rx| (rx, ry)))
                .map(|(rx, ry)| recorder.stamp(0, rx, ry, stage))
                .max()
                .unwrap()
        };
        let pixels_ready = rows_above(Stage::Alf);
        // 参考帧推迟了运动矢量进度, 要等到帧间预测之后
        let motion_ready = rows_above(Stage::InterPredict);
        for x in 0..width {
            assert!(recorder.stamp(1, x, y, Stage::InterPredict) > pixels_ready);
            assert!(recorder.stamp(1, x, y, Stage::Parse) > motion_ready);
        }
    }
}

#[test]
fn test_init_rejects_busy_context() {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, 2);
    let mut scheduler = FrameScheduler::new(&executor, Arc::new(DependencyTable::vvc()));
    let barrier = Arc::new(Barrier::new(2));
    let frame = TestFrame {
        faults: vec![(0, 0, Stage::Parse)],
        barrier: Some(Arc::clone(&barrier)),
        ..TestFrame::default()
    };
    scheduler
        .init(0, FrameLayout::raster(2, 2, 5, false), frame)
        .unwrap();
    scheduler.submit().unwrap();

    // (0, 0) 的解析任务停在屏障上, 帧仍在解码
    assert!(matches!(
        scheduler.init(1, FrameLayout::raster(2, 2, 5, false), TestFrame::default()),
        Err(TaoError::Internal(_))
    ));
    barrier.wait();
    assert!(scheduler.wait().is_err());
    assert!(
        scheduler
            .init(1, FrameLayout::raster(2, 2, 5, false), TestFrame::default())
            .is_ok()
    );
}

fn submit_layout(layout: FrameLayout) -> (Arc<Recorder>, TaoResult<()>, Arc<FrameProgress>) {
    init_logger();
    let recorder = Arc::new(Recorder::default());
    let executor = executor(&recorder, 2);
    let mut scheduler = FrameScheduler::new(&executor, Arc::new(DependencyTable::vvc()));
    let progress = scheduler.init(0, layout, TestFrame::default()).unwrap();
    let result = scheduler.submit();
    // 布局错误同样是这一帧的最终结果
    for _ in 0..2 {
        assert!(matches!(scheduler.wait(), Err(TaoError::InvalidData(_))));
    }
    assert!(!scheduler.is_complete());
    (recorder, result, progress)
}

#[test]
fn test_ctu_outside_every_slice_is_rejected() {
    let mut layout = FrameLayout::raster(2, 2, 5, false);
    layout.slices = vec![SliceLayout::single_entry(vec![0, 1, 2])];
    let (recorder, result, progress) = submit_layout(layout);
    assert!(matches!(result, Err(TaoError::InvalidData(_))));
    assert_eq!(recorder.count(), 0);
    assert!(progress.is_finished());
}

#[test]
fn test_ctu_in_two_slices_is_rejected() {
    let mut layout = FrameLayout::raster(2, 2, 5, false);
    layout.slices = vec![
        SliceLayout::single_entry(vec![0, 1, 2, 3]),
        SliceLayout::single_entry(vec![3]),
    ];
    let (recorder, result, progress) = submit_layout(layout);
    assert!(matches!(result, Err(TaoError::InvalidData(_))));
    assert_eq!(recorder.count(), 0);
    assert!(progress.is_finished());
}

#[test]
fn test_entry_point_out_of_range_is_rejected() {
    let mut layout = FrameLayout::raster(2, 2, 5, false);
    layout.slices = vec![SliceLayout::new(vec![0, 1, 2, 3], vec![0..2, 2..5])];
    let (_recorder, result, _progress) = submit_layout(layout);
    assert!(matches!(result, Err(TaoError::InvalidData(_))));
}

#[test]
fn test_stalled_table_is_reported() {
    // 左右 CTU 的 SAO 互相等待, 两端只靠帧外虚拟 CTU 补上一分, 永远凑不满
    let deps = DependencyTable::new()
        .add_unchecked(Stage::Sao, 1, 0, Stage::Sao)
        .add_unchecked(Stage::Sao, -1, 0, Stage::Sao);
    assert!(
        DependencyTable::new()
            .add(Stage::Sao, 1, 0, Stage::Sao)
            .unwrap()
            .add(Stage::Sao, -1, 0, Stage::Sao)
            .is_err()
    );

    for threads in [0, 2] {
        init_logger();
        let recorder = Arc::new(Recorder::default());
        let executor = executor(&recorder, threads);
        let mut scheduler = FrameScheduler::new(&executor, Arc::new(deps.clone()));
        let progress = scheduler
            .init(0, FrameLayout::raster(3, 1, 5, false), TestFrame::default())
            .unwrap();
        scheduler.submit().unwrap();

        assert!(matches!(scheduler.wait(), Err(TaoError::Internal(_))));
        assert!(scheduler.is_idle());
        assert!(!scheduler.is_complete());
        assert!(!recorder.ran(0, 1, 0, Stage::Sao));
        assert!(recorder.ran(0, 1, 0, Stage::DeblockHorizontal));
        // 停滞的帧同样放行等待它的帧
        assert!(progress.is_finished());
    }
}
