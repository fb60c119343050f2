//! CTU 阶段间的空间依赖表.
//!
//! 每条边 `(from, dx, dy, to)` 表示: 位于 (x, y) 的 CTU 完成 `from` 阶段后,
//! 为 (x + dx, y + dy) 处 CTU 的 `to` 阶段加一分. 某阶段的目标分数等于指向它的边数,
//! 因此目标由边表推导, 不单独配置.
//!
//! 偏移限制在 8 邻域内, 这样帧边界外一圈虚拟 CTU 就能补齐所有缺失的邻居.
//!
//! 每条边都必须按 (阶段, 光栅序) 严格向前: 跨阶段的边只能指向更靠后的阶段,
//! 同阶段的边只能指向光栅序更靠后的 CTU. 这样依赖图无环, 一帧总能走到终点.

use tao_core::{TaoError, TaoResult};

use super::stage::Stage;

/// 一条依赖边的目标端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// 目标 CTU 的列偏移
    pub dx: i32,
    /// 目标 CTU 的行偏移
    pub dy: i32,
    /// 被加分的阶段
    pub stage: Stage,
}

/// 阶段依赖表
#[derive(Debug, Clone)]
pub struct DependencyTable {
    edges: [Vec<Dependency>; Stage::COUNT],
    targets: [u8; Stage::COUNT],
}

impl Default for DependencyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyTable {
    /// 创建空表: 所有由表驱动的阶段目标为 0, 只等待自身上一阶段
    pub fn new() -> Self {
        Self {
            edges: Default::default(),
            targets: [0; Stage::COUNT],
        }
    }

    /// VVC 环内滤波的锯齿形依赖表
    pub fn vvc() -> Self {
        use Stage::*;

        // 注释为接收端需要的邻居: l 左, r 右, t 上, b 下
        const EDGES: &[(Stage, i32, i32, Stage)] = &[
            // deblock_bs: l + t parse
            (Parse, 0, 1, DeblockStrength),
            (Parse, 1, 0, DeblockStrength),
            // recon: l + rt recon
            (Reconstruct, -1, 1, Reconstruct),
            (Reconstruct, 1, 0, Reconstruct),
            // lmcs: r + b + rb recon
            (Reconstruct, -1, -1, Reshape),
            (Reconstruct, 0, -1, Reshape),
            (Reconstruct, -1, 0, Reshape),
            // deblock_v: l deblock_v
            (DeblockVertical, 1, 0, DeblockVertical),
            // deblock_h: r deblock_v + t deblock_h
            (DeblockVertical, -1, 0, DeblockHorizontal),
            (DeblockHorizontal, 0, 1, DeblockHorizontal),
            // sao: l + r + lb + b + rb deblock_h
            (DeblockHorizontal, -1, -1, Sao),
            (DeblockHorizontal, 0, -1, Sao),
            (DeblockHorizontal, -1, 0, Sao),
            (DeblockHorizontal, 1, -1, Sao),
            (DeblockHorizontal, 1, 0, Sao),
            // alf: 周围一圈 sao
            (Sao, -1, -1, Alf),
            (Sao, 0, -1, Alf),
            (Sao, -1, 0, Alf),
            (Sao, 1, -1, Alf),
            (Sao, -1, 1, Alf),
            (Sao, 1, 0, Alf),
            (Sao, 0, 1, Alf),
            (Sao, 1, 1, Alf),
        ];

        let mut table = Self::new();
        for &(from, dx, dy, to) in EDGES {
            table.push(from, dx, dy, to);
        }
        table
    }

    /// 添加一条依赖边
    ///
    /// 源阶段必须是 `Parse..=Alf`; 目标阶段不能是 `Init`/`Parse`/`InterPredict`,
    /// 这些阶段的目标由调度器根据码流结构决定. 会形成环的边 (指向更早的阶段,
    /// 或同阶段指向光栅序更早的 CTU) 被拒绝.
    pub fn add(mut self, from: Stage, dx: i32, dy: i32, to: Stage) -> TaoResult<Self> {
        if matches!(from, Stage::Init | Stage::Done) {
            return Err(TaoError::InvalidArgument(format!(
                "依赖边源阶段无效: {from}"
            )));
        }
        if to.is_scheduler_driven() {
            return Err(TaoError::InvalidArgument(format!(
                "阶段 {to} 的依赖由调度器管理, 不能出现在依赖表中"
            )));
        }
        if dx.abs() > 1 || dy.abs() > 1 || (dx == 0 && dy == 0) {
            return Err(TaoError::InvalidArgument(format!(
                "依赖偏移 ({dx}, {dy}) 必须是相邻 CTU"
            )));
        }
        if to < from {
            return Err(TaoError::InvalidArgument(format!(
                "依赖边 {from} -> {to} 指向更早的阶段"
            )));
        }
        if to == from && !(dy > 0 || (dy == 0 && dx > 0)) {
            return Err(TaoError::InvalidArgument(format!(
                "阶段 {to} 的同阶段依赖 ({dx}, {dy}) 必须指向光栅序更靠后的 CTU"
            )));
        }
        // 还要给自身上一阶段留出 +1
        if self.targets[to.index()] >= u8::MAX - 1 {
            return Err(TaoError::InvalidArgument(format!(
                "阶段 {to} 的依赖过多"
            )));
        }
        self.push(from, dx, dy, to);
        Ok(self)
    }

    /// 不做任何检查地添加一条边, 用于构造会停滞的依赖表
    #[cfg(test)]
    pub(crate) fn add_unchecked(mut self, from: Stage, dx: i32, dy: i32, to: Stage) -> Self {
        self.push(from, dx, dy, to);
        self
    }

    fn push(&mut self, from: Stage, dx: i32, dy: i32, to: Stage) {
        self.edges[from.index()].push(Dependency { dx, dy, stage: to });
        self.targets[to.index()] += 1;
    }

    /// `stage` 完成后需要加分的邻居
    pub fn successors(&self, stage: Stage) -> &[Dependency] {
        self.edges
            .get(stage.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 表驱动阶段的目标分数 (不含自身上一阶段的 +1)
    pub fn target(&self, stage: Stage) -> u8 {
        self.targets.get(stage.index()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vvc_targets() {
        let table = DependencyTable::vvc();
        assert_eq!(table.target(Stage::DeblockStrength), 2);
        assert_eq!(table.target(Stage::Reconstruct), 2);
        assert_eq!(table.target(Stage::Reshape), 3);
        assert_eq!(table.target(Stage::DeblockVertical), 1);
        assert_eq!(table.target(Stage::DeblockHorizontal), 2);
        assert_eq!(table.target(Stage::Sao), 5);
        assert_eq!(table.target(Stage::Alf), 8);
        assert_eq!(table.target(Stage::InterPredict), 0);
        assert!(table.successors(Stage::InterPredict).is_empty());
        assert!(table.successors(Stage::Done).is_empty());
    }

    #[test]
    fn test_vvc_table_passes_validation() {
        let vvc = DependencyTable::vvc();
        let mut rebuilt = DependencyTable::new();
        for from in Stage::RUNNABLE {
            for dep in vvc.successors(from) {
                rebuilt = rebuilt.add(from, dep.dx, dep.dy, dep.stage).unwrap();
            }
        }
        for stage in Stage::RUNNABLE {
            assert_eq!(rebuilt.target(stage), vvc.target(stage));
        }
    }

    #[test]
    fn test_add_rejects_invalid_edges() {
        let table = DependencyTable::new;
        assert!(table().add(Stage::Init, 1, 0, Stage::Sao).is_err());
        assert!(table().add(Stage::Sao, 1, 0, Stage::Parse).is_err());
        assert!(table().add(Stage::Sao, 1, 0, Stage::InterPredict).is_err());
        assert!(table().add(Stage::Sao, 2, 0, Stage::Alf).is_err());
        assert!(table().add(Stage::Sao, 0, 0, Stage::Alf).is_err());
        assert!(table().add(Stage::Sao, -1, 1, Stage::Alf).is_ok());
    }

    #[test]
    fn test_add_rejects_cyclic_edges() {
        let table = DependencyTable::new;
        // 指向更早的阶段
        assert!(table().add(Stage::Alf, 1, 0, Stage::Sao).is_err());
        assert!(table().add(Stage::Sao, 0, 1, Stage::DeblockStrength).is_err());
        // 同阶段指向光栅序更早的 CTU
        assert!(table().add(Stage::Sao, -1, 0, Stage::Sao).is_err());
        assert!(table().add(Stage::Sao, 1, -1, Stage::Sao).is_err());
        assert!(table().add(Stage::Sao, 0, -1, Stage::Sao).is_err());
        // 左右互相依赖的一对边, 第二条被拒绝
        let sao = table().add(Stage::Sao, 1, 0, Stage::Sao).unwrap();
        assert!(sao.add(Stage::Sao, -1, 0, Stage::Sao).is_err());

        assert!(table().add(Stage::Sao, -1, 1, Stage::Sao).is_ok());
        assert!(table().add(Stage::Sao, 1, 0, Stage::Sao).is_ok());
        assert!(table().add(Stage::Parse, -1, -1, Stage::Alf).is_ok());
    }
}
