// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/output/draw.rs - 分割结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
  draw_antialiased_line_segment_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
  text_size,
};
use imageproc::pixelops::interpolate;
use imageproc::point::Point;
use imageproc::rect::Rect;
use thiserror::Error;

use crate::model::{DetectResult, Detection};

// 类别调色板（RGB）
const PALETTE: [[u8; 3]; 20] = [
  [0xFF, 0x38, 0x38],
  [0xFF, 0x9D, 0x97],
  [0xFF, 0x70, 0x1F],
  [0xFF, 0xB2, 0x1D],
  [0xCF, 0xD2, 0x31],
  [0x48, 0xF9, 0x0A],
  [0x92, 0xCC, 0x17],
  [0x3D, 0xDB, 0x86],
  [0x1A, 0x93, 0x34],
  [0x00, 0xD4, 0xBB],
  [0x2C, 0x99, 0xA8],
  [0x00, 0xC2, 0xFF],
  [0x34, 0x45, 0x93],
  [0x64, 0x73, 0xFF],
  [0x00, 0x18, 0xEC],
  [0x84, 0x38, 0xFF],
  [0x52, 0x00, 0x85],
  [0xCB, 0x38, 0xFF],
  [0xFF, 0x95, 0xC8],
  [0xFF, 0x37, 0xC7],
];

const CONTOUR_COLOR: [u8; 3] = [255, 255, 255];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

// 绘制参数
const LABEL_FONT_SIZE: f32 = 48.0;
const LABEL_PADDING: i32 = 3;
const CONTOUR_THICKNESS: u32 = 3;
const BOX_THICKNESS: u32 = 10;
const MASK_ALPHA: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体无效: {0}")]
  InvalidFont(#[from] InvalidFont),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 同一类别在任何图像上都使用同一颜色
pub fn class_color(class_id: usize) -> Rgb<u8> {
  Rgb(PALETTE[class_id % PALETTE.len()])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStyle {
  pub font_size: f32,
  pub label_padding: i32,
  pub contour_thickness: u32,
  pub box_thickness: u32,
  pub mask_alpha: f32,
}

impl Default for DrawStyle {
  fn default() -> Self {
    DrawStyle {
      font_size: LABEL_FONT_SIZE,
      label_padding: LABEL_PADDING,
      contour_thickness: CONTOUR_THICKNESS,
      box_thickness: BOX_THICKNESS,
      mask_alpha: MASK_ALPHA,
    }
  }
}

pub struct Draw {
  font: FontArc,
  style: DrawStyle,
}

impl Draw {
  /// 使用内置字体
  pub fn new() -> Result<Self, DrawError> {
    let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf");
    Ok(Draw {
      font: FontArc::try_from_slice(font_data)?,
      style: DrawStyle::default(),
    })
  }

  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    Ok(Draw {
      font: FontArc::try_from_vec(data)?,
      style: DrawStyle::default(),
    })
  }

  pub fn with_style(mut self, style: DrawStyle) -> Self {
    self.style = style;
    self
  }

  pub fn style(&self) -> &DrawStyle {
    &self.style
  }

  /// 在原图的副本上绘制检测结果
  pub fn draw(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.clone();
    self.draw_detections_on_image(&mut canvas, result);
    canvas
  }

  // 闭合折线，线宽通过平移多次绘制抗锯齿线段实现
  fn draw_contour(&self, image: &mut RgbImage, contour: &[Point<i32>]) {
    if contour.len() < 2 {
      return;
    }
    let radius = (self.style.contour_thickness / 2) as i32;
    let color = Rgb(CONTOUR_COLOR);

    let next = contour.iter().cycle().skip(1);
    for (start, end) in contour.iter().zip(next) {
      if start == end {
        continue;
      }
      for dy in -radius..=radius {
        for dx in -radius..=radius {
          draw_antialiased_line_segment_mut(
            image,
            (start.x + dx, start.y + dy),
            (end.x + dx, end.y + dy),
            color,
            interpolate,
          );
        }
      }
    }
  }

  fn blend_mask(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let alpha = self.style.mask_alpha;
    let (width, height) = image.dimensions();
    if detection.mask.dimensions() != (width, height) {
      return;
    }

    let x_end = (detection.bbox[2].ceil() as u32).min(width);
    let y_end = (detection.bbox[3].ceil() as u32).min(height);
    for y in (detection.bbox[1].max(0.0) as u32)..y_end {
      for x in (detection.bbox[0].max(0.0) as u32)..x_end {
        if detection.mask.get_pixel(x, y)[0] == 0 {
          continue;
        }
        let pixel = image.get_pixel_mut(x, y);
        for c in 0..3 {
          let blended = color[c] as f32 * alpha + pixel[c] as f32 * (1.0 - alpha);
          pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
      }
    }
  }

  // 边框线宽以 bbox 边为中心
  fn draw_bbox(&self, image: &mut RgbImage, bbox: [i32; 4], color: Rgb<u8>) {
    let [x_min, y_min, x_max, y_max] = bbox;
    let thickness = self.style.box_thickness as i32;
    let outer = thickness / 2;
    for offset in (outer + 1 - thickness)..=outer {
      let width = x_max - x_min + 2 * offset;
      let height = y_max - y_min + 2 * offset;
      if width <= 0 || height <= 0 {
        continue;
      }
      let rect = Rect::at(x_min - offset, y_min - offset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  // 标签画在边框上方，超出图像顶部时画在边框内侧
  fn draw_label(&self, image: &mut RgbImage, bbox: [i32; 4], label: &str, color: Rgb<u8>) {
    let scale = PxScale::from(self.style.font_size);
    let padding = self.style.label_padding;
    let (text_width, text_height) = text_size(scale, &self.font, label);
    let (text_width, text_height) = (text_width as i32, text_height as i32);

    let background_height = text_height + 2 * padding;
    let background_width = text_width + 2 * padding;
    let top = if bbox[1] - background_height >= 0 {
      bbox[1] - background_height
    } else {
      bbox[1]
    };

    let rect = Rect::at(bbox[0], top).of_size(background_width as u32, background_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      bbox[0] + padding,
      top + padding,
      scale,
      &self.font,
      label,
    );
  }
}

pub trait DrawDetectionOnImage {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult);
}

impl DrawDetectionOnImage for Draw {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for detection in result.iter() {
      let color = class_color(detection.class_id);
      let bbox = [
        detection.bbox[0] as i32,
        detection.bbox[1] as i32,
        detection.bbox[2] as i32,
        detection.bbox[3] as i32,
      ];

      self.draw_contour(image, &detection.contour);
      self.blend_mask(image, detection, color);
      self.draw_bbox(image, bbox, color);
      let label = format!("{}: {:.3}", detection.class_name, detection.score);
      self.draw_label(image, bbox, &label, color);
    }
  }
}
