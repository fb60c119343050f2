//! 模拟解码器: 每个阶段只消耗固定时间, 用来驱动调度器.

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tao_codec::decoders::vvc::{CtuDecoder, FrameProgress, Stage, StageTask};
use tao_core::{TaoError, TaoResult};

/// 运动矢量最多指向参考块下方多少像素 (含插值滤波抽头)
const MV_REACH: i32 = 64 + 4;

/// 注入的阶段错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub frame: u64,
    pub x: u32,
    pub y: u32,
    pub stage: Stage,
}

/// 解析 `<帧>:<x>,<y>,<阶段>`, 例如 `3:1,2,recon`
pub fn parse_fault(s: &str) -> Result<Fault, String> {
    let (frame, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("格式应为 <帧>:<x>,<y>,<阶段>: {s}"))?;
    let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
    let [x, y, stage] = parts.as_slice() else {
        return Err(format!("格式应为 <帧>:<x>,<y>,<阶段>: {s}"));
    };
    let number = |v: &str| v.parse::<u32>().map_err(|e| format!("无效数字 '{v}': {e}"));
    Ok(Fault {
        frame: frame
            .trim()
            .parse()
            .map_err(|e| format!("无效帧号 '{frame}': {e}"))?,
        x: number(*x)?,
        y: number(*y)?,
        stage: stage.parse().map_err(|e: TaoError| e.to_string())?,
    })
}

/// 模拟帧
pub struct SimFrame {
    /// 前一帧的进度, 同时用作帧间预测参考
    pub reference: Option<Arc<FrameProgress>>,
    pub faults: Vec<Fault>,
}

/// 模拟解码器
pub struct SimDecoder {
    work: Duration,
    stages: AtomicU64,
}

impl SimDecoder {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            stages: AtomicU64::new(0),
        }
    }

    /// 已执行的阶段总数
    pub fn stages(&self) -> u64 {
        self.stages.load(Ordering::Relaxed)
    }

    fn spin(&self) {
        if self.work.is_zero() {
            return;
        }
        let start = Instant::now();
        while start.elapsed() < self.work {
            hint::spin_loop();
        }
    }
}

impl CtuDecoder for SimDecoder {
    type Frame = SimFrame;
    /// 本线程执行的阶段数
    type Local = u64;

    fn local_context(&self) -> TaoResult<u64> {
        Ok(0)
    }

    fn run_stage(&self, task: &StageTask<'_, Self>, local: &mut u64) -> TaoResult<()> {
        *local += 1;
        self.stages.fetch_add(1, Ordering::Relaxed);

        let frame = task.frame();
        if task.stage() == Stage::Parse {
            if let Some(reference) = &frame.reference {
                let bottom = ((task.y() + 1) << task.ctu_log2_size()) as i32 - 1;
                task.wait_for_reference(reference, bottom + MV_REACH)?;
            }
        }
        self.spin();

        let failed = frame.faults.iter().any(|fault| {
            fault.frame == task.decode_order()
                && (fault.x, fault.y, fault.stage) == (task.x(), task.y(), task.stage())
        });
        if failed {
            return Err(TaoError::Codec(format!(
                "模拟错误: {}({}, {})",
                task.stage(),
                task.x(),
                task.y()
            )));
        }
        Ok(())
    }
}
