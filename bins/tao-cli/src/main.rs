//! tao-cli - VVC 帧并行 CTU 调度模拟器
//!
//! 用耗时可控的空阶段代替真实的 VVC 解码, 让 CTU 调度器跑完整的多帧流水线:
//! 每个 P 帧都以前一帧为同位帧和帧间参考, 最后输出每帧结果与吞吐量.

mod logging;
mod simulate;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};

use tao_codec::decoders::vvc::{
    DependencyTable, FrameLayout, FrameOutcome, FramePipeline, FrameProgress, SchedulerConfig,
};

use simulate::{Fault, SimDecoder, SimFrame, parse_fault};

#[derive(Parser, Debug)]
#[command(name = "tao-cli", version, about = "VVC 帧并行 CTU 调度模拟")]
struct Cli {
    /// 画面宽度 (像素)
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// 画面高度 (像素)
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// CTU 边长 (像素, 2 的幂)
    #[arg(long = "ctu-size", default_value_t = 128)]
    ctu_size: u32,

    /// 模拟帧数
    #[arg(short = 'n', long, default_value_t = 16)]
    frames: u64,

    /// 工作线程数, 0 为自动
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,

    /// 启用波前并行 (WPP)
    #[arg(long)]
    wpp: bool,

    /// 每帧 slice 数 (按 CTU 行均分)
    #[arg(long, default_value_t = 1)]
    slices: u32,

    /// 低延迟模式, 帧与帧之间不重叠
    #[arg(long = "low-delay")]
    low_delay: bool,

    /// 每个阶段模拟的计算时间 (微秒)
    #[arg(long, default_value_t = 0)]
    work: u64,

    /// 注入阶段错误, 格式 <帧>:<x>,<y>,<阶段>, 可重复
    #[arg(long = "fail", value_parser = parse_fault)]
    fail: Vec<Fault>,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn ctu_log2_size(&self) -> Result<u8> {
        if !self.ctu_size.is_power_of_two() {
            bail!("CTU 边长必须是 2 的幂: {}", self.ctu_size);
        }
        Ok(self.ctu_size.trailing_zeros() as u8)
    }

    fn layout(&self, ctu_log2_size: u8, collocated: Option<&Arc<FrameProgress>>) -> FrameLayout {
        let layout = FrameLayout::raster_slices(
            self.width.div_ceil(self.ctu_size),
            self.height.div_ceil(self.ctu_size),
            ctu_log2_size,
            self.wpp,
            self.slices,
        );
        match collocated {
            Some(progress) => layout.with_collocated(Arc::clone(progress)),
            None => layout,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init("tao-cli", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    match run(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("{failed} 帧解码失败");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("错误: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// 运行模拟, 返回失败帧数
fn run(cli: &Cli) -> Result<usize> {
    let ctu_log2_size = cli.ctu_log2_size()?;
    let config = SchedulerConfig {
        thread_count: cli.threads,
        low_delay: cli.low_delay,
        ..SchedulerConfig::default()
    };
    let decoder = Arc::new(SimDecoder::new(Duration::from_micros(cli.work)));
    let mut pipeline = FramePipeline::new(Arc::clone(&decoder), DependencyTable::vvc(), &config)
        .context("创建帧流水线失败")?;
    info!(
        "{}x{} CTU {}, {} 帧, 线程 {}, 帧上下文 {}, wpp {}, slice {}",
        cli.width,
        cli.height,
        cli.ctu_size,
        cli.frames,
        pipeline.thread_count(),
        pipeline.frame_contexts(),
        cli.wpp,
        cli.slices
    );

    let start = Instant::now();
    let mut failed = 0;
    let mut previous: Option<Arc<FrameProgress>> = None;
    for n in 0..cli.frames {
        let frame = SimFrame {
            reference: previous.clone(),
            faults: cli.fail.iter().filter(|f| f.frame == n).copied().collect(),
        };
        let layout = cli.layout(ctu_log2_size, previous.as_ref());
        let submitted = pipeline
            .submit_frame(layout, frame)
            .with_context(|| format!("提交第 {n} 帧失败"))?;
        previous = Some(submitted.progress);

        while let Some(outcome) = pipeline.receive_outcome() {
            failed += report(&outcome);
        }
    }
    for outcome in pipeline.flush() {
        failed += report(&outcome);
    }

    let elapsed = start.elapsed();
    let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "完成 {} 帧, 执行 {} 个阶段, 耗时 {:.3} 秒, {:.1} 帧/秒",
        cli.frames,
        decoder.stages(),
        elapsed.as_secs_f64(),
        cli.frames as f64 / seconds
    );
    Ok(failed)
}

fn report(outcome: &FrameOutcome) -> usize {
    match &outcome.result {
        Ok(()) => {
            info!("frame {:5} 完成", outcome.decode_order);
            0
        }
        Err(e) => {
            error!("frame {:5} 失败: {}", outcome.decode_order, e);
            1
        }
    }
}
