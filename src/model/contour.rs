// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model/contour.rs - 掩码轮廓提取
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

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::point::Point;

/// 取二值掩码中点数最多的外轮廓，点数相同时取先找到的；没有前景时返回空轮廓
pub fn largest_external_contour(mask: &GrayImage) -> Vec<Point<i32>> {
  let mut best: Vec<Point<i32>> = Vec::new();
  for contour in find_contours::<i32>(mask) {
    if contour.border_type != BorderType::Outer || contour.parent.is_some() {
      continue;
    }
    if contour.points.len() > best.len() {
      best = contour.points;
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Luma;

  fn fill(mask: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
    for y in y0..y1 {
      for x in x0..x1 {
        mask.put_pixel(x, y, Luma([255]));
      }
    }
  }

  #[test]
  fn empty_mask_has_no_contour() {
    assert!(largest_external_contour(&GrayImage::new(8, 8)).is_empty());
  }

  #[test]
  fn picks_the_larger_blob() {
    let mut mask = GrayImage::new(40, 40);
    fill(&mut mask, 2, 2, 6, 6);
    fill(&mut mask, 10, 10, 30, 30);

    let contour = largest_external_contour(&mask);
    assert!(!contour.is_empty());
    assert!(contour.iter().all(|p| (10..30).contains(&p.x) && (10..30).contains(&p.y)));
  }

  #[test]
  fn holes_do_not_count() {
    let mut mask = GrayImage::new(30, 30);
    fill(&mut mask, 5, 5, 25, 25);
    for y in 10..20 {
      for x in 10..20 {
        mask.put_pixel(x, y, Luma([0]));
      }
    }
    let contour = largest_external_contour(&mask);
    assert!(contour.iter().any(|p| p.x == 5));
    assert!(contour.iter().any(|p| p.x == 24));
  }
}
