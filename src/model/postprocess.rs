// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model/postprocess.rs - 分割模型后处理
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

use image::{GrayImage, Luma};
use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::{debug, trace};

use crate::frame::LetterboxTransform;
use crate::model::{
  DetectError, Detection, InferenceError, Labels, NoDetectionError, RawOutput, Thresholds, contour,
};

/// 掩码二值化阈值
pub const MASK_THRESHOLD: f32 = 0.5;

/// 通过置信度筛选的候选框，坐标为张量空间下的 (cx, cy, w, h)
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: usize,
  pub coefficients: Vec<f32>,
}

impl Candidate {
  pub fn corners(&self) -> [f32; 4] {
    let [cx, cy, w, h] = self.bbox;
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
  }
}

/// 两个 (x_min, y_min, x_max, y_max) 框的交并比
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = inter_w * inter_h;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 解析 `[1, 4 + nc + nm, N]` 的预测张量，保留最大类别分数高于阈值的锚点
pub fn decode_candidates(
  preds: &[f32],
  shape: &[usize],
  num_coefficients: usize,
  confidence: f32,
) -> Result<Vec<Candidate>, InferenceError> {
  let (channels, anchors) = match shape {
    [1, channels, anchors] => (*channels, *anchors),
    _ => {
      return Err(InferenceError::MalformedOutput(format!(
        "预测输出形状应为 [1, C, N], 实际为 {:?}",
        shape
      )));
    }
  };
  if channels <= 4 + num_coefficients {
    return Err(InferenceError::MalformedOutput(format!(
      "预测输出通道数 {} 不足以容纳 4 个坐标、类别分数与 {} 个掩码系数",
      channels, num_coefficients
    )));
  }
  if preds.len() != channels * anchors {
    return Err(InferenceError::MalformedOutput(format!(
      "预测输出长度 {} 与形状 {:?} 不一致",
      preds.len(),
      shape
    )));
  }

  let num_classes = channels - 4 - num_coefficients;
  let at = |c: usize, n: usize| preds[c * anchors + n];

  let mut candidates = Vec::new();
  for n in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(4 + c, n)))
      .fold((0usize, f32::NEG_INFINITY), |best, current| {
        if current.1 > best.1 { current } else { best }
      });
    if score <= confidence {
      continue;
    }

    candidates.push(Candidate {
      bbox: [at(0, n), at(1, n), at(2, n), at(3, n)],
      score,
      class_id,
      coefficients: (0..num_coefficients)
        .map(|k| at(4 + num_classes + k, n))
        .collect(),
    });
  }

  debug!(
    "{} 个锚点中 {} 个通过置信度阈值 {}",
    anchors,
    candidates.len(),
    confidence
  );
  Ok(candidates)
}

/// 不区分类别的非极大值抑制
///
/// 返回保留下来的候选索引，按分数从高到低排列。分数相同时保持输入顺序。
pub fn non_max_suppression(candidates: &[Candidate], iou_threshold: f32) -> Vec<usize> {
  let mut order: Vec<usize> = (0..candidates.len()).collect();
  order.sort_by(|&a, &b| {
    candidates[b]
      .score
      .partial_cmp(&candidates[a].score)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut keep: Vec<usize> = Vec::new();
  for index in order {
    let corners = candidates[index].corners();
    let suppressed = keep
      .iter()
      .any(|&kept| iou(candidates[kept].corners(), corners) > iou_threshold);
    if !suppressed {
      keep.push(index);
    }
  }
  keep
}

/// 原图尺寸下的双线性采样（像素中心对齐，边缘钳制）
struct MaskSampler<'a> {
  plane: ArrayView1<'a, f32>,
  proto_width: usize,
  top: usize,
  left: usize,
  crop_height: usize,
  crop_width: usize,
  scale_x: f32,
  scale_y: f32,
}

impl MaskSampler<'_> {
  fn axis(dst: u32, scale: f32, len: usize) -> (usize, usize, f32) {
    let src = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (len - 1) as f32);
    let lo = src.floor() as usize;
    let hi = (lo + 1).min(len - 1);
    (lo, hi, src - lo as f32)
  }

  fn at(&self, y: usize, x: usize) -> f32 {
    self.plane[(self.top + y) * self.proto_width + self.left + x]
  }

  fn sample(&self, x: u32, y: u32) -> f32 {
    let (x0, x1, fx) = Self::axis(x, self.scale_x, self.crop_width);
    let (y0, y1, fy) = Self::axis(y, self.scale_y, self.crop_height);
    let top = self.at(y0, x0) * (1.0 - fx) + self.at(y0, x1) * fx;
    let bottom = self.at(y1, x0) * (1.0 - fx) + self.at(y1, x1) * fx;
    top * (1.0 - fy) + bottom * fy
  }
}

/// 原型掩码中对应原图内容（去除 letterbox 填充）的区域：(top, left, bottom, right)
fn proto_crop(
  proto_height: usize,
  proto_width: usize,
  source_height: u32,
  source_width: u32,
) -> (usize, usize, usize, usize) {
  let (mh, mw) = (proto_height as f64, proto_width as f64);
  let (h0, w0) = (source_height as f64, source_width as f64);
  let gain = f64::min(mh / h0, mw / w0);
  let pad_x = (mw - w0 * gain) / 2.0;
  let pad_y = (mh - h0 * gain) / 2.0;

  let top = (pad_y - 0.1).round().max(0.0) as usize;
  let left = (pad_x - 0.1).round().max(0.0) as usize;
  let bottom = ((mh - pad_y + 0.1).round() as usize).min(proto_height);
  let right = ((mw - pad_x + 0.1).round() as usize).min(proto_width);
  (top, left, bottom, right)
}

fn protos_dims(shape: &[usize]) -> Result<(usize, usize, usize), InferenceError> {
  match shape {
    [1, nm, mh, mw] if *nm > 0 && *mh > 0 && *mw > 0 => Ok((*nm, *mh, *mw)),
    _ => Err(InferenceError::MalformedOutput(format!(
      "原型掩码形状应为 [1, nm, mh, mw], 实际为 {:?}",
      shape
    ))),
  }
}

fn shape_error(err: ndarray::ShapeError) -> InferenceError {
  InferenceError::MalformedOutput(format!("掩码张量形状错误: {}", err))
}

/// 从模型原始输出得到原图坐标下的检测结果（框、二值掩码、轮廓）
pub fn postprocess(
  raw: &RawOutput,
  transform: &LetterboxTransform,
  thresholds: &Thresholds,
  labels: &Labels,
) -> Result<Vec<Detection>, DetectError> {
  let (nm, mh, mw) = protos_dims(&raw.protos_shape)?;
  if raw.protos.len() != nm * mh * mw {
    return Err(
      InferenceError::MalformedOutput(format!(
        "原型掩码长度 {} 与形状 {:?} 不一致",
        raw.protos.len(),
        raw.protos_shape
      ))
      .into(),
    );
  }

  let candidates = decode_candidates(&raw.preds, &raw.preds_shape, nm, thresholds.confidence)?;
  let keep = non_max_suppression(&candidates, thresholds.iou);
  debug!("NMS 后保留 {} 个目标", keep.len());
  if keep.is_empty() {
    return Err(NoDetectionError.into());
  }

  let (source_width, source_height) = (transform.source_width, transform.source_height);
  let (top, left, bottom, right) = proto_crop(mh, mw, source_height, source_width);
  if bottom <= top || right <= left {
    return Err(
      InferenceError::MalformedOutput(format!(
        "原型掩码 {}x{} 无法映射到 {}x{} 的原图",
        mw, mh, source_width, source_height
      ))
      .into(),
    );
  }
  let (crop_height, crop_width) = (bottom - top, right - left);

  let coefficients = Array2::from_shape_vec(
    (keep.len(), nm),
    keep
      .iter()
      .flat_map(|&index| candidates[index].coefficients.iter().copied())
      .collect(),
  )
  .map_err(shape_error)?;
  let protos = ArrayView2::from_shape((nm, mh * mw), &raw.protos[..]).map_err(shape_error)?;
  let planes = coefficients.dot(&protos);

  let mut detections = Vec::with_capacity(keep.len());
  for (row, &index) in keep.iter().enumerate() {
    let candidate = &candidates[index];
    let bbox = transform.box_to_original(candidate.corners());

    let sampler = MaskSampler {
      plane: planes.row(row),
      proto_width: mw,
      top,
      left,
      crop_height,
      crop_width,
      scale_x: crop_width as f32 / source_width as f32,
      scale_y: crop_height as f32 / source_height as f32,
    };

    // 掩码只在框内计算：列满足 x1 <= c < x2，行满足 y1 <= r < y2
    let mut mask = GrayImage::new(source_width, source_height);
    let x_range = (bbox[0].ceil() as u32).min(source_width)..(bbox[2].ceil() as u32).min(source_width);
    let y_range = (bbox[1].ceil() as u32).min(source_height)..(bbox[3].ceil() as u32).min(source_height);
    for y in y_range {
      for x in x_range.clone() {
        if sampler.sample(x, y) > MASK_THRESHOLD {
          mask.put_pixel(x, y, Luma([255]));
        }
      }
    }

    let contour = contour::largest_external_contour(&mask);
    trace!(
      "目标 {}: 类别 {}, 分数 {:.3}, 框 {:?}, 轮廓点数 {}",
      row,
      candidate.class_id,
      candidate.score,
      bbox,
      contour.len()
    );

    detections.push(Detection {
      class_id: candidate.class_id,
      class_name: labels.name_of(candidate.class_id).to_string(),
      score: candidate.score,
      bbox,
      mask,
      contour,
    });
  }

  Ok(detections)
}
