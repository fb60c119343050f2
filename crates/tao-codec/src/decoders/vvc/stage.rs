//! CTU 处理阶段.

use std::fmt;
use std::str::FromStr;

use tao_core::TaoError;

/// CTU 流水线阶段, 严格按声明顺序推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// 帧级一次性初始化, 只有光栅序 0 号 CTU 经过此阶段
    Init = 0,
    /// 码流解析
    Parse,
    /// 去块滤波强度推导
    DeblockStrength,
    /// 帧间预测
    InterPredict,
    /// 重建
    Reconstruct,
    /// 环内亮度映射 (LMCS)
    Reshape,
    /// 垂直边界去块
    DeblockVertical,
    /// 水平边界去块
    DeblockHorizontal,
    /// 样点自适应偏移
    Sao,
    /// 自适应环路滤波
    Alf,
    /// 全部完成
    Done,
}

impl Stage {
    /// 可执行阶段数量 (不含 `Done`)
    pub const COUNT: usize = 10;

    /// 全部可执行阶段, 按执行顺序
    pub const RUNNABLE: [Stage; Stage::COUNT] = [
        Stage::Init,
        Stage::Parse,
        Stage::DeblockStrength,
        Stage::InterPredict,
        Stage::Reconstruct,
        Stage::Reshape,
        Stage::DeblockVertical,
        Stage::DeblockHorizontal,
        Stage::Sao,
        Stage::Alf,
    ];

    /// 执行器优先级桶数量
    pub(crate) const PRIORITIES: usize = 3;

    /// 阶段序号
    pub fn index(self) -> usize {
        self as usize
    }

    /// 按序号取阶段, 越界时返回 `Done`
    pub fn from_index(index: usize) -> Stage {
        Stage::RUNNABLE.get(index).copied().unwrap_or(Stage::Done)
    }

    /// 下一阶段, `Done` 之后仍为 `Done`
    pub fn next(self) -> Stage {
        Stage::from_index(self.index() + 1)
    }

    /// 阶段名称, 用于日志与错误信息
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Parse => "parse",
            Stage::DeblockStrength => "deblock_bs",
            Stage::InterPredict => "inter",
            Stage::Reconstruct => "recon",
            Stage::Reshape => "lmcs",
            Stage::DeblockVertical => "deblock_v",
            Stage::DeblockHorizontal => "deblock_h",
            Stage::Sao => "sao",
            Stage::Alf => "alf",
            Stage::Done => "done",
        }
    }

    /// 该阶段任务的执行器优先级 (0 最高)
    ///
    /// 参考帧完成一行可能一次放出整行的帧间预测任务, 放到最低优先级,
    /// 避免淹没解析与滤波任务.
    pub(crate) fn priority(self) -> usize {
        match self {
            Stage::Init | Stage::Parse => 0,
            Stage::InterPredict => 2,
            _ => 1,
        }
    }

    /// 该阶段的依赖目标是否由调度器自身决定 (不可出现在依赖表的目标端)
    pub(crate) fn is_scheduler_driven(self) -> bool {
        matches!(
            self,
            Stage::Init | Stage::Parse | Stage::InterPredict | Stage::Done
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = TaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::RUNNABLE
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| TaoError::InvalidArgument(format!("未知阶段: {s}")))
    }
}
