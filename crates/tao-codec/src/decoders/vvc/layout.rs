//! 帧的 CTU 划分: 网格尺寸、tile 边界、slice 与入口点.

use std::ops::Range;
use std::sync::Arc;

use tao_core::{TaoError, TaoResult};

use super::progress::FrameProgress;

/// 一个 slice 的 CTU 组织
#[derive(Debug, Clone, Default)]
pub struct SliceLayout {
    /// 按解码顺序排列的 CTU 光栅地址
    pub ctu_addrs: Vec<u32>,
    /// 入口点, 每项为 `ctu_addrs` 中的下标区间, 每个入口点从全新的熵解码状态开始
    pub entry_points: Vec<Range<usize>>,
}

impl SliceLayout {
    /// 创建 slice
    pub fn new(ctu_addrs: Vec<u32>, entry_points: Vec<Range<usize>>) -> Self {
        Self {
            ctu_addrs,
            entry_points,
        }
    }

    /// 整个 slice 只有一个入口点
    pub fn single_entry(ctu_addrs: Vec<u32>) -> Self {
        let len = ctu_addrs.len();
        Self::new(ctu_addrs, vec![0..len])
    }
}

/// 一帧的 CTU 布局
#[derive(Debug, Clone)]
pub struct FrameLayout {
    /// 每行 CTU 数
    pub ctu_width: u32,
    /// CTU 行数
    pub ctu_height: u32,
    /// CTU 边长的 log2
    pub ctu_log2_size: u8,
    /// 是否启用波前并行 (WPP)
    pub wpp: bool,
    /// 各 tile 列的起始 CTU 列, 为空表示整帧一个 tile 列
    pub tile_columns: Vec<u32>,
    /// 各 tile 行的起始 CTU 行, 为空表示整帧一个 tile 行
    pub tile_rows: Vec<u32>,
    /// 帧内所有 slice
    pub slices: Vec<SliceLayout>,
    /// 时域运动矢量预测使用的同位参考帧
    pub collocated: Option<Arc<FrameProgress>>,
}

impl FrameLayout {
    /// 单 tile 单 slice 的光栅扫描布局
    ///
    /// 启用 WPP 时每个 CTU 行是一个入口点.
    pub fn raster(ctu_width: u32, ctu_height: u32, ctu_log2_size: u8, wpp: bool) -> Self {
        Self::raster_slices(ctu_width, ctu_height, ctu_log2_size, wpp, 1)
    }

    /// 按 CTU 行均分为 `slice_count` 个光栅扫描 slice
    pub fn raster_slices(
        ctu_width: u32,
        ctu_height: u32,
        ctu_log2_size: u8,
        wpp: bool,
        slice_count: u32,
    ) -> Self {
        let slice_count = slice_count.clamp(1, ctu_height.max(1));
        let slices = (0..slice_count)
            .map(|i| {
                let first_row = i * ctu_height / slice_count;
                let end_row = (i + 1) * ctu_height / slice_count;
                let ctu_addrs: Vec<u32> = (first_row * ctu_width..end_row * ctu_width).collect();
                if wpp {
                    let width = ctu_width as usize;
                    let entry_points = (0..(end_row - first_row) as usize)
                        .map(|row| row * width..(row + 1) * width)
                        .collect();
                    SliceLayout::new(ctu_addrs, entry_points)
                } else {
                    SliceLayout::single_entry(ctu_addrs)
                }
            })
            .collect();

        Self {
            ctu_width,
            ctu_height,
            ctu_log2_size,
            wpp,
            tile_columns: Vec::new(),
            tile_rows: Vec::new(),
            slices,
            collocated: None,
        }
    }

    /// 设置同位参考帧
    pub fn with_collocated(mut self, collocated: Arc<FrameProgress>) -> Self {
        self.collocated = Some(collocated);
        self
    }

    /// CTU 总数
    pub fn ctu_count(&self) -> usize {
        self.ctu_width as usize * self.ctu_height as usize
    }

    /// CTU 边长 (像素)
    pub fn ctu_size(&self) -> u32 {
        1 << self.ctu_log2_size
    }

    /// 检查网格尺寸与 tile 边界
    ///
    /// slice 与入口点在提交时检查.
    pub(crate) fn validate(&self) -> TaoResult<()> {
        if self.ctu_width == 0 || self.ctu_height == 0 {
            return Err(TaoError::InvalidArgument(format!(
                "CTU 网格尺寸无效: {}x{}",
                self.ctu_width, self.ctu_height
            )));
        }
        if !(3..=8).contains(&self.ctu_log2_size) {
            return Err(TaoError::InvalidArgument(format!(
                "CTU 尺寸 log2 无效: {}",
                self.ctu_log2_size
            )));
        }
        let pixel_height = u64::from(self.ctu_height) << self.ctu_log2_size;
        if pixel_height >= i32::MAX as u64 || u32::try_from(self.ctu_count()).is_err() {
            return Err(TaoError::InvalidArgument(format!(
                "帧尺寸过大: {}x{} CTU",
                self.ctu_width, self.ctu_height
            )));
        }
        check_tile_bounds("列", &self.tile_columns, self.ctu_width)?;
        check_tile_bounds("行", &self.tile_rows, self.ctu_height)?;
        Ok(())
    }

    /// 每个 CTU 列所在 tile 的起始列
    pub(crate) fn tile_column_starts(&self) -> Box<[u32]> {
        tile_starts(&self.tile_columns, self.ctu_width)
    }

    /// 每个 CTU 行所在 tile 的起始行
    pub(crate) fn tile_row_starts(&self) -> Box<[u32]> {
        tile_starts(&self.tile_rows, self.ctu_height)
    }
}

fn check_tile_bounds(what: &str, bounds: &[u32], limit: u32) -> TaoResult<()> {
    if bounds.is_empty() {
        return Ok(());
    }
    let ordered = bounds.windows(2).all(|pair| pair[0] < pair[1]);
    if bounds[0] != 0 || !ordered || bounds[bounds.len() - 1] >= limit {
        return Err(TaoError::InvalidArgument(format!(
            "tile {what}边界无效: {bounds:?}"
        )));
    }
    Ok(())
}

fn tile_starts(bounds: &[u32], len: u32) -> Box<[u32]> {
    let mut start = 0;
    (0..len)
        .map(|i| {
            if bounds.contains(&i) {
                start = i;
            }
            start
        })
        .collect()
}
