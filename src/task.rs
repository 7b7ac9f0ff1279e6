// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/task.rs - 检测流水线与任务
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
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{ConfigError, ModelPaths, ModelResolver, ModelSelector, PipelineConfig},
  input::{ImageFileInput, InvalidImageError},
  model::{
    DetectError, DetectResult, InferenceError, InvalidThresholdError, Model, ModelLoadError,
    NoDetectionError, Thresholds,
  },
  output::{
    OutputError, OutputWrapper, Render, SaveImageFileOutput,
    draw::{Draw, DrawError},
  },
  registry::{EngineLoader, ModelRegistry, OnnxLoader},
  tally::{CountObject, PointTable, PointTableError, ReportItem, tally},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("图像无效: {0}")]
  InvalidImage(#[from] InvalidImageError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  NoDetection(#[from] NoDetectionError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("积分表错误: {0}")]
  PointTable(#[from] PointTableError),
  #[error("绘制错误: {0}")]
  Draw(#[from] DrawError),
  #[error("阈值无效: {0}")]
  InvalidThreshold(#[from] InvalidThresholdError),
}

impl From<DetectError> for PipelineError {
  fn from(err: DetectError) -> Self {
    match err {
      DetectError::InvalidImage(e) => PipelineError::InvalidImage(e),
      DetectError::Inference(e) => PipelineError::Inference(e),
      DetectError::NoDetection(e) => PipelineError::NoDetection(e),
      DetectError::InvalidThreshold(e) => PipelineError::InvalidThreshold(e),
    }
  }
}

impl PipelineError {
  /// 没有检测到物体属于业务情况，应提示用户重新拍摄，而不是当作系统故障
  pub fn is_no_detection(&self) -> bool {
    matches!(self, PipelineError::NoDetection(_))
  }
}

/// 一次上报的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
  /// 标注图像的文件名，形如 `garbage_pcs_<原文件名>`
  pub filename: String,
  pub path: PathBuf,
  pub total_point: i64,
  pub counts: Vec<CountObject>,
  pub items: Vec<ReportItem>,
}

/// 模型选择 -> 加载 -> 推理 -> 标注保存 -> 计数
pub struct Pipeline<R = ModelPaths, L: EngineLoader = OnnxLoader, O = OutputWrapper> {
  registry: Arc<ModelRegistry<L>>,
  resolver: R,
  points: PointTable,
  thresholds: Thresholds,
  output: O,
}

impl Pipeline {
  pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
    let draw = match &config.font {
      Some(font) => Draw::with_font_file(font)?,
      None => Draw::new()?,
    };
    let points = match &config.points {
      Some(path) => PointTable::from_path(path)?,
      None => {
        warn!("未配置积分表，所有类别积分为 0");
        PointTable::default()
      }
    };
    let loader = OnnxLoader {
      backend: config.backend,
      intra_threads: config.intra_threads,
    };
    let output = OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(
      &config.output.directory,
      draw,
    ));

    Pipeline::new(
      Arc::new(ModelRegistry::new(loader)),
      config.models.clone(),
      output,
    )
    .with_points(points)
    .with_thresholds(config.thresholds)
  }
}

impl<R, L, O> Pipeline<R, L, O>
where
  R: ModelResolver,
  L: EngineLoader,
  O: Render,
  OutputError: From<O::Error>,
{
  pub fn new(registry: Arc<ModelRegistry<L>>, resolver: R, output: O) -> Self {
    Pipeline {
      registry,
      resolver,
      points: PointTable::default(),
      thresholds: Thresholds::default(),
      output,
    }
  }

  pub fn with_points(mut self, points: PointTable) -> Self {
    self.points = points;
    self
  }

  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Result<Self, PipelineError> {
    thresholds.validate()?;
    self.thresholds = thresholds;
    Ok(self)
  }

  pub fn with_output<P>(self, output: P) -> Pipeline<R, L, P>
  where
    P: Render,
    OutputError: From<P::Error>,
  {
    Pipeline {
      registry: self.registry,
      resolver: self.resolver,
      points: self.points,
      thresholds: self.thresholds,
      output,
    }
  }

  pub fn registry(&self) -> &Arc<ModelRegistry<L>> {
    &self.registry
  }

  pub fn thresholds(&self) -> &Thresholds {
    &self.thresholds
  }

  /// 只做检测，不保存、不计数
  pub fn detect(
    &self,
    image: &RgbImage,
    selector: ModelSelector,
  ) -> Result<DetectResult, PipelineError> {
    let source = self.resolver.resolve(selector);
    let engine = self
      .registry
      .get_or_load(&source.model, Some(source.labels.as_path()))?;

    let now = Instant::now();
    let result = engine.detect(image, &self.thresholds)?;
    info!(
      "{} 推理完成，检测到 {} 个物体，耗时: {:.2?}",
      selector.label(),
      result.len(),
      now.elapsed()
    );
    Ok(result)
  }

  pub fn process_image(
    &self,
    image: &RgbImage,
    selector: ModelSelector,
    filename: &str,
  ) -> Result<ReportOutcome, PipelineError> {
    let result = self.detect(image, selector)?;

    let filename = format!("{}_{}", selector.label(), filename);
    let now = Instant::now();
    let path = self
      .output
      .render_result(image, &result, &filename)
      .map_err(OutputError::from)?;
    debug!("渲染完成，耗时: {:.2?}", now.elapsed());

    let report = tally(&result.items, &self.points, selector.tally_mode());
    Ok(ReportOutcome {
      filename,
      path,
      total_point: report.total_point,
      counts: report.counts,
      items: report.items,
    })
  }

  /// 处理上传的编码图像数据
  pub fn process_bytes(
    &self,
    bytes: &[u8],
    selector: ModelSelector,
    filename: &str,
  ) -> Result<ReportOutcome, PipelineError> {
    let input = ImageFileInput::from_bytes(bytes, filename)?;
    self.process_input(input, selector)
  }

  pub fn process_file<P: AsRef<Path>>(
    &self,
    path: P,
    selector: ModelSelector,
  ) -> Result<ReportOutcome, PipelineError> {
    self.process_input(ImageFileInput::open(path)?, selector)
  }

  fn process_input(
    &self,
    mut input: ImageFileInput,
    selector: ModelSelector,
  ) -> Result<ReportOutcome, PipelineError> {
    let filename = input.filename().to_string();
    let image = input.next().ok_or(InvalidImageError::Empty)?;
    self.process_image(&image, selector, &filename)
  }
}

pub trait Task<R, L: EngineLoader, O>: Sized {
  type Output;
  fn run_task(
    self,
    input: ImageFileInput,
    pipeline: &Pipeline<R, L, O>,
  ) -> Result<Self::Output, PipelineError>;
}

pub struct OneShotTask {
  pub selector: ModelSelector,
}

impl<R, L, O> Task<R, L, O> for OneShotTask
where
  R: ModelResolver,
  L: EngineLoader,
  O: Render,
  OutputError: From<O::Error>,
{
  type Output = ReportOutcome;

  fn run_task(
    self,
    input: ImageFileInput,
    pipeline: &Pipeline<R, L, O>,
  ) -> Result<Self::Output, PipelineError> {
    info!("开始任务...");
    let now = Instant::now();
    let outcome = pipeline.process_input(input, self.selector)?;
    info!("任务完成，耗时: {:.2?}", now.elapsed());
    Ok(outcome)
  }
}

#[derive(Debug, Clone)]
pub struct RepeatShotReport {
  pub outcome: ReportOutcome,
  pub runs: usize,
  /// 去掉预热的前两次后的平均耗时
  pub average: Duration,
}

pub struct RepeatShotTask {
  pub selector: ModelSelector,
  pub repeat: usize,
}

const REPEAT_WARMUP: usize = 2;

impl<R, L, O> Task<R, L, O> for RepeatShotTask
where
  R: ModelResolver,
  L: EngineLoader,
  O: Render,
  OutputError: From<O::Error>,
{
  type Output = RepeatShotReport;

  fn run_task(
    self,
    mut input: ImageFileInput,
    pipeline: &Pipeline<R, L, O>,
  ) -> Result<Self::Output, PipelineError> {
    info!("开始任务...");
    let filename = input.filename().to_string();
    let image = input.next().ok_or(InvalidImageError::Empty)?;
    let runs = self.repeat.max(1);

    let mut times = Vec::with_capacity(runs);
    let mut outcome = None;
    for i in 0..runs {
      let now = Instant::now();
      let current = pipeline.process_image(&image, self.selector, &filename)?;
      let elapsed = now.elapsed();
      info!("({})处理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      outcome = Some(current);
    }

    let skip = if times.len() > REPEAT_WARMUP { REPEAT_WARMUP } else { 0 };
    let measured = &times[skip..];
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    warn!("平均处理时间: {:.2?}", average);

    let outcome = outcome.ok_or(InvalidImageError::Empty)?;
    Ok(RepeatShotReport {
      outcome,
      runs,
      average,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ModelSource;

  #[test]
  fn detect_error_maps_onto_pipeline_error() {
    let err: PipelineError = DetectError::NoDetection(NoDetectionError).into();
    assert!(err.is_no_detection());
    assert_eq!(err.to_string(), "No object detected");

    let err: PipelineError = DetectError::InvalidImage(InvalidImageError::Empty).into();
    assert!(!err.is_no_detection());
  }

  #[test]
  fn from_config_with_missing_points_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = ModelSource {
      model: dir.path().join("m.onnx"),
      labels: dir.path().join("m.yaml"),
    };
    let config = PipelineConfig {
      models: ModelPaths {
        pieces: source.clone(),
        pile: source,
      },
      thresholds: Thresholds::default(),
      output: Default::default(),
      points: Some(dir.path().join("absent.toml")),
      font: None,
      backend: Default::default(),
      intra_threads: None,
    };
    assert!(matches!(
      Pipeline::from_config(&config),
      Err(PipelineError::PointTable(_))
    ));
  }
}
