// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model/yolov8_seg.rs - YOLOv8 分割模型（ONNX Runtime）
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
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use half::f16;
use ort::execution_providers::{
  CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
  RKNPUExecutionProvider,
};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNchwTensor, LetterboxFrame, RGB_CHANNELS},
  model::{InferenceError, Labels, Model, ModelLoadError, RawOutput},
};

/// 输入尺寸为动态维度时使用的默认边长
const YOLOV8_SEG_DEFAULT_SIZE: usize = 640;
/// 检测输出与原型掩码输出
const YOLOV8_SEG_NUM_OUTPUTS: usize = 2;

/// 推理后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// CUDA 可用时使用 CUDA，否则使用 CPU
  #[default]
  Auto,
  Cpu,
  Cuda,
  Rknpu,
}

impl FromStr for Backend {
  type Err = ModelLoadError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(Backend::Auto),
      "cpu" => Ok(Backend::Cpu),
      "cuda" | "gpu" => Ok(Backend::Cuda),
      "rknpu" | "npu" => Ok(Backend::Rknpu),
      other => Err(ModelLoadError::ModelPathError(format!(
        "未知的推理后端: {}",
        other
      ))),
    }
  }
}

impl Backend {
  /// 将 `Auto` 解析为具体后端
  pub fn resolve(self) -> Backend {
    match self {
      Backend::Auto => match CUDAExecutionProvider::default().is_available() {
        Ok(true) => Backend::Cuda,
        _ => Backend::Cpu,
      },
      other => other,
    }
  }

  fn execution_providers(self) -> Vec<ExecutionProviderDispatch> {
    match self {
      Backend::Cuda => vec![
        CUDAExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ],
      Backend::Rknpu => vec![
        RKNPUExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ],
      Backend::Auto | Backend::Cpu => vec![CPUExecutionProvider::default().build()],
    }
  }
}

/// 模型输入声明的数值精度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
  Half,
  Single,
}

pub struct YoloSegBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  backend: Backend,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for YoloSegBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloSegBuilder {
  type Error = ModelLoadError;

  /// `onnx:///path/model.onnx?labels=/path/data.yaml&backend=cuda&threads=4`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = YoloSegBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => builder.labels_path = Some(PathBuf::from(value.as_ref())),
        "backend" => builder.backend = value.parse()?,
        "threads" => {
          let threads = value.parse::<usize>().map_err(|_| {
            ModelLoadError::ModelPathError(format!("线程数无效: {}", value))
          })?;
          builder.intra_threads = Some(threads);
        }
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }
    Ok(builder)
  }
}

impl YoloSegBuilder {
  pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
    YoloSegBuilder {
      model_path: model_path.into(),
      labels_path: None,
      backend: Backend::default(),
      intra_threads: None,
    }
  }

  pub fn labels<P: Into<PathBuf>>(mut self, labels_path: P) -> Self {
    self.labels_path = Some(labels_path.into());
    self
  }

  pub fn backend(mut self, backend: Backend) -> Self {
    self.backend = backend;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<YoloSeg, ModelLoadError> {
    let model_display = self.model_path.display().to_string();
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", model_display);
      return Err(ModelLoadError::NotFound(self.model_path));
    }
    let labels_path = self
      .labels_path
      .ok_or_else(|| ModelLoadError::MissingLabels(model_display.clone()))?;
    if !labels_path.is_file() {
      error!("标签文件不存在: {}", labels_path.display());
      return Err(ModelLoadError::NotFound(labels_path));
    }
    let labels = Labels::from_path(&labels_path)?;
    debug!("标签数量: {}", labels.len());

    let backend = self.backend.resolve();
    info!("加载模型文件: {}, 推理后端: {:?}", model_display, backend);

    let mut builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_execution_providers(backend.execution_providers())?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    let input = session
      .inputs
      .first()
      .ok_or_else(|| ModelLoadError::InvalidModel("模型没有输入".to_string()))?;
    let input_name = input.name.clone();

    let precision = match input.input_type.tensor_type() {
      Some(TensorElementType::Float16) => Precision::Half,
      Some(TensorElementType::Float32) => Precision::Single,
      other => {
        return Err(ModelLoadError::InvalidModel(format!(
          "不支持的输入类型: {:?}",
          other
        )));
      }
    };

    let shape = input
      .input_type
      .tensor_shape()
      .ok_or_else(|| ModelLoadError::InvalidModel("模型输入不是张量".to_string()))?;
    if shape.len() != 4 {
      return Err(ModelLoadError::InvalidModel(format!(
        "模型输入应为 NCHW 四维张量, 实际为 {:?}",
        &shape[..]
      )));
    }
    let dimension = |d: i64| {
      if d > 0 {
        d as usize
      } else {
        YOLOV8_SEG_DEFAULT_SIZE
      }
    };
    let (input_height, input_width) = (dimension(shape[2]), dimension(shape[3]));

    if session.outputs.len() < YOLOV8_SEG_NUM_OUTPUTS {
      error!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        YOLOV8_SEG_NUM_OUTPUTS,
        session.outputs.len()
      );
      return Err(ModelLoadError::InvalidModel(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        YOLOV8_SEG_NUM_OUTPUTS,
        session.outputs.len()
      )));
    }

    debug!("模型输入: {} {:?}", input_name, &shape[..]);
    debug!(
      "模型输入尺寸: {}x{}, 精度: {:?}",
      input_width, input_height, precision
    );

    Ok(YoloSeg {
      session: Mutex::new(session),
      input_name,
      input_height,
      input_width,
      precision,
      labels,
      backend,
    })
  }
}

/// 已加载的 YOLOv8 分割推理引擎
pub struct YoloSeg {
  session: Mutex<Session>,
  input_name: String,
  input_height: usize,
  input_width: usize,
  precision: Precision,
  labels: Labels,
  backend: Backend,
}

impl YoloSeg {
  pub fn precision(&self) -> Precision {
    self.precision
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }
}

fn extract_tensor(value: &DynValue) -> Result<(Vec<usize>, Vec<f32>), InferenceError> {
  let to_dims = |shape: &[i64]| shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
  match value.dtype().tensor_type() {
    Some(TensorElementType::Float16) => {
      let (shape, data) = value.try_extract_tensor::<f16>()?;
      Ok((to_dims(shape), data.iter().map(|v| v.to_f32()).collect()))
    }
    Some(TensorElementType::Float32) => {
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      Ok((to_dims(shape), data.to_vec()))
    }
    other => Err(InferenceError::MalformedOutput(format!(
      "不支持的输出类型: {:?}",
      other
    ))),
  }
}

impl Model for YoloSeg {
  fn input_size(&self) -> (usize, usize) {
    (self.input_height, self.input_width)
  }

  fn labels(&self) -> &Labels {
    &self.labels
  }

  fn infer(&self, input: &LetterboxFrame) -> Result<RawOutput, InferenceError> {
    let expected = [1, RGB_CHANNELS, self.input_height, self.input_width];
    if input.shape() != expected {
      return Err(InferenceError::ShapeMismatch {
        expected,
        found: input.shape(),
      });
    }

    // 会话运行需要可变借用
    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

    debug!("执行模型推理");
    let outputs = match self.precision {
      Precision::Single => {
        let tensor = Tensor::from_array((input.shape(), input.as_nchw().to_vec()))?;
        session.run(ort::inputs![self.input_name.as_str() => tensor])?
      }
      Precision::Half => {
        let data: Vec<f16> = input.as_nchw().iter().map(|&v| f16::from_f32(v)).collect();
        let tensor = Tensor::from_array((input.shape(), data))?;
        session.run(ort::inputs![self.input_name.as_str() => tensor])?
      }
    };

    if outputs.len() < YOLOV8_SEG_NUM_OUTPUTS {
      return Err(InferenceError::MissingOutput {
        expected: YOLOV8_SEG_NUM_OUTPUTS,
        found: outputs.len(),
      });
    }

    let (preds_shape, preds) = extract_tensor(&outputs[0])?;
    let (protos_shape, protos) = extract_tensor(&outputs[1])?;
    debug!("预测输出形状: {:?}, 原型掩码形状: {:?}", preds_shape, protos_shape);

    Ok(RawOutput {
      preds,
      preds_shape,
      protos,
      protos_shape,
    })
  }
}
