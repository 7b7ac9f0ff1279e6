// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
    save_image_file::plain_filename,
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("文件名无效: {0}")]
  InvalidFilename(String),
}

#[derive(Serialize)]
struct DetectionRecord<'a> {
  class_id: usize,
  class_name: &'a str,
  score: f32,
  bbox: [f32; 4],
  contour: Vec<[i32; 2]>,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  source: &'a str,
  recorded_at: String,
  detections: Vec<DetectionRecord<'a>>,
}

/// 按 `年/月/日` 分目录保存标注图像，并在旁边写一份 JSON 检测记录
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counters: Mutex<u16>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(DirectoryRecordOutput::new(uri.path(), Draw::new()?))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: Into<PathBuf>>(directory: P, draw: Draw) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      draw,
      frame_counters: Mutex::new(0),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counters.lock().unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self, now: &DateTime<Utc>, filename: &str) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}-{}",
      now.format("%H-%M-%S"),
      self.frame_id(),
      filename
    )))
  }

  fn record(
    &self,
    path: &Path,
    now: &DateTime<Utc>,
    filename: &str,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    let record = FrameRecord {
      source: filename,
      recorded_at: now.to_rfc3339(),
      detections: result
        .iter()
        .map(|item| DetectionRecord {
          class_id: item.class_id,
          class_name: &item.class_name,
          score: item.score,
          bbox: item.bbox,
          contour: item.contour.iter().map(|p| [p.x, p.y]).collect(),
        })
        .collect(),
    };
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    image: &RgbImage,
    result: &DetectResult,
    filename: &str,
  ) -> Result<PathBuf, Self::Error> {
    let filename = plain_filename(filename)
      .map_err(|_| DirectoryRecordOutputError::InvalidFilename(filename.to_string()))?;
    let now = Utc::now();
    let path = self.frame_path(&now, filename)?;

    self.draw.draw(image, result).save(&path)?;
    self.record(&path, &now, filename, result)?;
    info!("记录检测结果: {}", path.display());
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn writes_dated_image_and_json_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), Draw::new().unwrap());
    let image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));

    let path = output
      .render_result(&image, &DetectResult::default(), "garbage_pile_a.png")
      .unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(path.exists());
    assert_eq!(path.strip_prefix(dir.path()).unwrap().components().count(), 4);

    let record: serde_json::Value =
      serde_json::from_slice(&std::fs::read(path.with_extension("json")).unwrap()).unwrap();
    assert_eq!(record["source"], "garbage_pile_a.png");
    assert_eq!(record["detections"].as_array().unwrap().len(), 0);
  }

  #[test]
  fn frame_ids_increase() {
    let output = DirectoryRecordOutput::new("/unused", Draw::new().unwrap());
    assert_eq!(output.frame_id(), 1);
    assert_eq!(output.frame_id(), 2);
  }
}
