// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model/letterbox.rs - Letterbox 预处理
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

use image::{RgbImage, imageops};
use tracing::debug;

use crate::frame::{LetterboxFrame, LetterboxTransform, RGB_CHANNELS};

/// 填充颜色（每个通道）
pub const PAD_VALUE: u8 = 114;

/// 计算缩放比例与填充量
///
/// 返回 (transform, 缩放后宽, 缩放后高, 左侧填充像素, 顶部填充像素)。
fn plan(
  source_width: u32,
  source_height: u32,
  target_height: usize,
  target_width: usize,
) -> (LetterboxTransform, u32, u32, usize, usize) {
  let scale = f64::min(
    target_height as f64 / source_height as f64,
    target_width as f64 / source_width as f64,
  );
  let new_width = ((source_width as f64 * scale).round() as u32).clamp(1, target_width as u32);
  let new_height = ((source_height as f64 * scale).round() as u32).clamp(1, target_height as u32);

  let pad_x = (target_width as f64 - new_width as f64) / 2.0;
  let pad_y = (target_height as f64 - new_height as f64) / 2.0;
  // 奇数填充时，多出的一个像素放在右侧/底部
  let left = (pad_x - 0.1).round().max(0.0) as usize;
  let top = (pad_y - 0.1).round().max(0.0) as usize;

  let transform = LetterboxTransform {
    scale: scale as f32,
    pad_x: pad_x as f32,
    pad_y: pad_y as f32,
    source_width,
    source_height,
  };
  (transform, new_width, new_height, left, top)
}

/// 将任意尺寸的 RGB 图像缩放并居中填充到 `target_height x target_width`
///
/// 输出为 NCHW、RGB 通道顺序、归一化到 [0, 1] 的浮点张量。
pub fn letterbox(image: &RgbImage, target_height: usize, target_width: usize) -> LetterboxFrame {
  let (source_width, source_height) = image.dimensions();
  let (transform, new_width, new_height, left, top) =
    plan(source_width, source_height, target_height, target_width);
  debug!(
    "letterbox: {}x{} -> {}x{}, 缩放 {:.4}, 填充 ({:.1}, {:.1})",
    source_width,
    source_height,
    new_width,
    new_height,
    transform.scale,
    transform.pad_x,
    transform.pad_y
  );

  let resized;
  let content = if (new_width, new_height) == (source_width, source_height) {
    image
  } else {
    resized = imageops::resize(image, new_width, new_height, imageops::FilterType::Triangle);
    &resized
  };

  let plane = target_height * target_width;
  let mut data = vec![PAD_VALUE as f32 / 255.0; RGB_CHANNELS * plane];
  for (x, y, pixel) in content.enumerate_pixels() {
    let (tx, ty) = (x as usize + left, y as usize + top);
    if tx >= target_width || ty >= target_height {
      continue;
    }
    let offset = ty * target_width + tx;
    for c in 0..RGB_CHANNELS {
      data[c * plane + offset] = pixel[c] as f32 / 255.0;
    }
  }

  LetterboxFrame::from_parts(data, target_height, target_width, transform)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::AsNchwTensor;
  use image::Rgb;
  use proptest::prelude::*;

  const PAD: f32 = PAD_VALUE as f32 / 255.0;

  #[test]
  fn wide_image_is_padded_vertically() {
    let image = RgbImage::from_pixel(1280, 640, Rgb([255, 0, 0]));
    let frame = letterbox(&image, 640, 640);
    let transform = frame.transform();

    assert_eq!(frame.shape(), [1, 3, 640, 640]);
    assert!((transform.scale - 0.5).abs() < 1e-6);
    assert_eq!(transform.pad_x, 0.0);
    assert_eq!(transform.pad_y, 160.0);

    // 顶部填充区域为灰色，内容区域为红色
    assert!((frame.value(0, 10, 320) - PAD).abs() < 1e-6);
    assert!((frame.value(0, 320, 320) - 1.0).abs() < 1e-6);
    assert!(frame.value(1, 320, 320).abs() < 1e-6);
    assert!((frame.value(2, 639, 320) - PAD).abs() < 1e-6);
  }

  #[test]
  fn channels_stay_in_rgb_order() {
    let image = RgbImage::from_pixel(4, 4, Rgb([0, 51, 255]));
    let frame = letterbox(&image, 4, 4);
    assert_eq!(frame.value(0, 1, 1), 0.0);
    assert!((frame.value(1, 1, 1) - 0.2).abs() < 1e-6);
    assert_eq!(frame.value(2, 1, 1), 1.0);
  }

  #[test]
  fn odd_padding_puts_extra_pixel_at_the_end() {
    let image = RgbImage::from_pixel(10, 7, Rgb([0, 0, 0]));
    let frame = letterbox(&image, 10, 10);
    let transform = frame.transform();
    assert_eq!(transform.pad_y, 1.5);
    // 顶部 1 行填充，底部 2 行填充
    assert!((frame.value(0, 0, 5) - PAD).abs() < 1e-6);
    assert_eq!(frame.value(0, 1, 5), 0.0);
    assert_eq!(frame.value(0, 7, 5), 0.0);
    assert!((frame.value(0, 8, 5) - PAD).abs() < 1e-6);
  }

  proptest! {
    #[test]
    fn box_round_trip(
      width in 1u32..2000,
      height in 1u32..2000,
      target in prop::sample::select(vec![320usize, 416, 640]),
      fx in 0.0f32..1.0,
      fy in 0.0f32..1.0,
      fw in 0.0f32..1.0,
      fh in 0.0f32..1.0,
    ) {
      let (transform, ..) = plan(width, height, target, target);
      let x1 = fx * width as f32;
      let y1 = fy * height as f32;
      let x2 = (x1 + fw * (width as f32 - x1)).min(width as f32);
      let y2 = (y1 + fh * (height as f32 - y1)).min(height as f32);

      let (tx1, ty1) = transform.to_tensor(x1, y1);
      let (tx2, ty2) = transform.to_tensor(x2, y2);
      let back = transform.box_to_original([tx1, ty1, tx2, ty2]);

      let tolerance = 1e-3 * (width.max(height) as f32).max(1.0);
      prop_assert!((back[0] - x1).abs() <= tolerance);
      prop_assert!((back[1] - y1).abs() <= tolerance);
      prop_assert!((back[2] - x2).abs() <= tolerance);
      prop_assert!((back[3] - y2).abs() <= tolerance);
    }
  }
}
