// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/frame.rs - Letterbox 张量帧定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

pub const RGB_CHANNELS: usize = 3;

pub trait AsNchwTensor {
  fn as_nchw(&self) -> &[f32];
  fn shape(&self) -> [usize; 4];
}

/// Letterbox 变换参数
///
/// 张量坐标与原图坐标之间的关系为 `tensor = original * scale + pad`，
/// 反过来 `original = (tensor - pad) / scale`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub source_width: u32,
  pub source_height: u32,
}

impl LetterboxTransform {
  /// 张量坐标 -> 原图坐标
  pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }

  /// 原图坐标 -> 张量坐标
  pub fn to_tensor(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
  }

  /// 将张量空间中的 [x_min, y_min, x_max, y_max] 映射回原图，并裁剪到图像边界
  pub fn box_to_original(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (x_min, y_min) = self.to_original(bbox[0], bbox[1]);
    let (x_max, y_max) = self.to_original(bbox[2], bbox[3]);
    let (w, h) = (self.source_width as f32, self.source_height as f32);
    [
      x_min.clamp(0.0, w),
      y_min.clamp(0.0, h),
      x_max.clamp(0.0, w),
      y_max.clamp(0.0, h),
    ]
  }
}

/// 经过 letterbox 处理的 NCHW 浮点帧（批大小为 1）
#[derive(Debug, Clone)]
pub struct LetterboxFrame {
  data: Box<[f32]>,
  height: usize,
  width: usize,
  transform: LetterboxTransform,
}

impl LetterboxFrame {
  pub(crate) fn from_parts(
    data: Vec<f32>,
    height: usize,
    width: usize,
    transform: LetterboxTransform,
  ) -> Self {
    debug_assert_eq!(data.len(), RGB_CHANNELS * height * width);
    Self {
      data: data.into_boxed_slice(),
      height,
      width,
      transform,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn transform(&self) -> &LetterboxTransform {
    &self.transform
  }

  /// 读取 (c, y, x) 处的归一化像素值
  pub fn value(&self, c: usize, y: usize, x: usize) -> f32 {
    self.data[c * self.height * self.width + y * self.width + x]
  }
}

impl AsNchwTensor for LetterboxFrame {
  fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height, self.width]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_mapping_is_clipped_to_source() {
    let transform = LetterboxTransform {
      scale: 0.5,
      pad_x: 0.0,
      pad_y: 80.0,
      source_width: 1280,
      source_height: 960,
    };
    let bbox = transform.box_to_original([-10.0, 60.0, 700.0, 200.0]);
    assert_eq!(bbox[0], 0.0);
    assert_eq!(bbox[1], 0.0);
    assert_eq!(bbox[2], 1280.0);
    assert_eq!(bbox[3], 240.0);
  }
}
