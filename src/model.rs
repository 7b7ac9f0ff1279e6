// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model.rs - 模型
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

use std::path::PathBuf;

use image::{GrayImage, RgbImage};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frame::LetterboxFrame;
use crate::input::{InvalidImageError, validate_image};

pub mod contour;
mod labels;
pub mod letterbox;
pub mod postprocess;
mod yolov8_seg;

pub use self::labels::{LabelError, Labels};
pub use self::yolov8_seg::{Backend, Precision, YoloSeg, YoloSegBuilder};

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("首次加载模型 {0} 时必须提供标签文件")]
  MissingLabels(String),
  #[error("标签错误: {0}")]
  Labels(#[from] LabelError),
  #[error("ONNX Runtime 错误: {0}")]
  Session(#[from] ort::Error),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("输入尺寸不匹配: 模型需要 {expected:?}, 实际为 {found:?}")]
  ShapeMismatch {
    expected: [usize; 4],
    found: [usize; 4],
  },
  #[error("模型输出缺失: 期望至少 {expected} 个输出, 实际 {found} 个")]
  MissingOutput { expected: usize, found: usize },
  #[error("模型输出形状无效: {0}")]
  MalformedOutput(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No object detected")]
pub struct NoDetectionError;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("图像无效: {0}")]
  InvalidImage(#[from] InvalidImageError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  NoDetection(#[from] NoDetectionError),
  #[error("阈值无效: {0}")]
  InvalidThreshold(#[from] InvalidThresholdError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("{name} = {value}，应在 [0, 1] 内")]
pub struct InvalidThresholdError {
  pub name: &'static str,
  pub value: f32,
}

/// 置信度与 NMS 阈值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
  pub confidence: f32,
  pub iou: f32,
}

impl Thresholds {
  /// 两个阈值都必须是 [0, 1] 内的数，NaN 不通过
  pub fn validate(&self) -> Result<(), InvalidThresholdError> {
    for (name, value) in [("confidence", self.confidence), ("iou", self.iou)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(InvalidThresholdError { name, value });
      }
    }
    Ok(())
  }
}

impl Default for Thresholds {
  fn default() -> Self {
    Thresholds {
      confidence: 0.4,
      iou: 0.45,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Detection {
  pub class_id: usize,
  pub class_name: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图坐标
  /// 原图大小的二值掩码，取值 0 或 255，只在 bbox 内非零
  pub mask: GrayImage,
  /// 掩码的最大外轮廓，可能为空
  pub contour: Vec<Point<i32>>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

/// 模型原始输出
///
/// `preds` 形状为 `[1, 4 + nc + nm, N]`，`protos` 形状为 `[1, nm, mh, mw]`。
#[derive(Debug, Clone)]
pub struct RawOutput {
  pub preds: Vec<f32>,
  pub preds_shape: Vec<usize>,
  pub protos: Vec<f32>,
  pub protos_shape: Vec<usize>,
}

pub trait Model: Send + Sync {
  /// 模型输入的 (高, 宽)
  fn input_size(&self) -> (usize, usize);

  fn labels(&self) -> &Labels;

  fn infer(&self, input: &LetterboxFrame) -> Result<RawOutput, InferenceError>;

  /// 完整的检测流程：letterbox -> 推理 -> 后处理
  fn detect(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<DetectResult, DetectError> {
    validate_image(image)?;
    thresholds.validate()?;
    let (height, width) = self.input_size();
    let frame = letterbox::letterbox(image, height, width);
    let raw = self.infer(&frame)?;

    let items = postprocess::postprocess(&raw, frame.transform(), thresholds, self.labels())?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_thresholds_are_valid() {
    assert!(Thresholds::default().validate().is_ok());
    let edges = Thresholds {
      confidence: 0.0,
      iou: 1.0,
    };
    assert!(edges.validate().is_ok());
  }

  #[test]
  fn nan_and_out_of_range_thresholds_are_rejected() {
    let cases = [
      (f32::NAN, 0.45, "confidence"),
      (1.5, 0.45, "confidence"),
      (-0.1, 0.45, "confidence"),
      (0.4, f32::NAN, "iou"),
      (0.4, 2.0, "iou"),
    ];
    for (confidence, iou, name) in cases {
      let err = Thresholds { confidence, iou }.validate().unwrap_err();
      assert_eq!(err.name, name);
    }
  }
}
