// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/config.rs - 流水线配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Backend, InvalidThresholdError, Thresholds};
use crate::tally::TallyMode;

const DEFAULT_OUTPUT_DIRECTORY: &str = "assets/detected_image";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("TOML 解析错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("阈值无效: {0}")]
  InvalidThreshold(#[from] InvalidThresholdError),
}

/// 两个训练好的模型：逐个物体 / 整堆垃圾
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelector {
  #[default]
  Pieces,
  Pile,
}

impl ModelSelector {
  /// 输出文件名前缀
  pub fn label(&self) -> &'static str {
    match self {
      ModelSelector::Pieces => "garbage_pcs",
      ModelSelector::Pile => "garbage_pile",
    }
  }

  pub fn tally_mode(&self) -> TallyMode {
    match self {
      ModelSelector::Pieces => TallyMode::Discrete,
      ModelSelector::Pile => TallyMode::GarbagePile,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
  pub model: PathBuf,
  pub labels: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPaths {
  pub pieces: ModelSource,
  pub pile: ModelSource,
}

/// 由选择器得到模型与标签路径
pub trait ModelResolver: Send + Sync {
  fn resolve(&self, selector: ModelSelector) -> &ModelSource;
}

impl ModelResolver for ModelPaths {
  fn resolve(&self, selector: ModelSelector) -> &ModelSource {
    match selector {
      ModelSelector::Pieces => &self.pieces,
      ModelSelector::Pile => &self.pile,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
  pub directory: PathBuf,
}

impl Default for OutputConfig {
  fn default() -> Self {
    OutputConfig {
      directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
  pub models: ModelPaths,
  #[serde(default)]
  pub thresholds: Thresholds,
  #[serde(default)]
  pub output: OutputConfig,
  /// 积分表文件（TOML 或 JSON）
  #[serde(default)]
  pub points: Option<PathBuf>,
  /// 标注字体，缺省使用内置字体
  #[serde(default)]
  pub font: Option<PathBuf>,
  #[serde(default)]
  pub backend: Backend,
  #[serde(default)]
  pub intra_threads: Option<usize>,
}

impl PipelineConfig {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取配置文件: {}", path.display());
    Self::from_toml_str(&std::fs::read_to_string(path)?)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    self.thresholds.validate()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
[models.pieces]
model = "models/garbage-pcs.onnx"
labels = "models/garbage-pcs.yaml"

[models.pile]
model = "models/garbage-pile.onnx"
labels = "models/garbage-pile.yaml"
"#;

  #[test]
  fn defaults_apply() {
    let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
    assert_eq!(config.thresholds, Thresholds::default());
    assert_eq!(config.output.directory, PathBuf::from(DEFAULT_OUTPUT_DIRECTORY));
    assert_eq!(config.backend, Backend::Auto);
    assert!(config.points.is_none());
    assert_eq!(
      config.models.resolve(ModelSelector::Pile).model,
      PathBuf::from("models/garbage-pile.onnx")
    );
  }

  #[test]
  fn overrides_are_read() {
    let content = format!(
      "points = \"points.toml\"\nbackend = \"cpu\"\n{}\n[thresholds]\nconfidence = 0.25\n\n[output]\ndirectory = \"/srv/detected\"\n",
      MINIMAL
    );
    let config = PipelineConfig::from_toml_str(&content).unwrap();
    assert_eq!(config.thresholds.confidence, 0.25);
    assert_eq!(config.thresholds.iou, 0.45);
    assert_eq!(config.backend, Backend::Cpu);
    assert_eq!(config.output.directory, PathBuf::from("/srv/detected"));
    assert_eq!(config.points, Some(PathBuf::from("points.toml")));
  }

  #[test]
  fn out_of_range_threshold_is_rejected() {
    let content = format!("{}\n[thresholds]\niou = 1.5\n", MINIMAL);
    assert!(matches!(
      PipelineConfig::from_toml_str(&content),
      Err(ConfigError::InvalidThreshold(_))
    ));
  }

  #[test]
  fn nan_threshold_is_rejected() {
    let content = format!("{}\n[thresholds]\nconfidence = nan\n", MINIMAL);
    assert!(matches!(
      PipelineConfig::from_toml_str(&content),
      Err(ConfigError::InvalidThreshold(InvalidThresholdError {
        name: "confidence",
        ..
      }))
    ));
  }

  #[test]
  fn selector_labels_and_modes() {
    assert_eq!(ModelSelector::Pieces.label(), "garbage_pcs");
    assert_eq!(ModelSelector::Pile.label(), "garbage_pile");
    assert_eq!(ModelSelector::Pile.tally_mode(), TallyMode::GarbagePile);
  }
}
