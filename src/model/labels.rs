// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("YAML 解析错误: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("TOML 解析错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("不支持的标签文件格式: {0}")]
  UnsupportedFormat(String),
  #[error("标签列表为空")]
  Empty,
  #[error("无效的类别索引: {0}")]
  InvalidIndex(String),
  #[error("类别索引不连续, 缺少 {0}")]
  MissingIndex(usize),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum LabelKey {
  Index(usize),
  Text(String),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LabelNames {
  List(Vec<String>),
  Map(BTreeMap<LabelKey, String>),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LabelFile {
  Wrapped { names: LabelNames },
  Bare(LabelNames),
}

/// 类别索引到类别名称的有序列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Labels {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 按扩展名解析标签文件：`.yaml`/`.yml`、`.toml`、`.json`
  ///
  /// 文件内容可以是 `names` 字段（列表或 `索引: 名称` 映射），也可以直接是列表或映射。
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let extension = path
      .extension()
      .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
      .unwrap_or_default();

    let labels = match extension.as_str() {
      "yaml" | "yml" => Self::from_yaml_str(&content)?,
      "toml" => Self::from_toml_str(&content)?,
      "json" => Self::from_json_str(&content)?,
      other => return Err(LabelError::UnsupportedFormat(other.to_string())),
    };
    debug!("从 {} 读取 {} 个类别标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn from_yaml_str(content: &str) -> Result<Self, LabelError> {
    Self::from_file(serde_yaml::from_str(content)?)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelError> {
    Self::from_file(toml::from_str(content)?)
  }

  pub fn from_json_str(content: &str) -> Result<Self, LabelError> {
    Self::from_file(serde_json::from_str(content)?)
  }

  fn from_file(file: LabelFile) -> Result<Self, LabelError> {
    let names = match file {
      LabelFile::Wrapped { names } | LabelFile::Bare(names) => names,
    };

    let names = match names {
      LabelNames::List(names) => names,
      LabelNames::Map(map) => {
        let mut indexed = map
          .into_iter()
          .map(|(key, name)| {
            let index = match key {
              LabelKey::Index(index) => index,
              LabelKey::Text(text) => text
                .trim()
                .parse::<usize>()
                .map_err(|_| LabelError::InvalidIndex(text))?,
            };
            Ok((index, name))
          })
          .collect::<Result<Vec<_>, LabelError>>()?;
        indexed.sort_by_key(|(index, _)| *index);

        for (expected, (index, _)) in indexed.iter().enumerate() {
          if *index != expected {
            return Err(LabelError::MissingIndex(expected));
          }
        }
        indexed.into_iter().map(|(_, name)| name).collect()
      }
    };

    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Labels { names })
  }

  pub fn name_of(&self, class_id: usize) -> &str {
    self
      .names
      .get(class_id)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yaml_names_list() {
    let labels = Labels::from_yaml_str("names:\n  - bottle\n  - can\n").unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name_of(1), "can");
  }

  #[test]
  fn yaml_names_map_with_integer_keys() {
    let yaml = "path: ../datasets\nnames:\n  1: can\n  0: bottle\n  2: plastic bag\n";
    let labels = Labels::from_yaml_str(yaml).unwrap();
    assert_eq!(labels.iter().collect::<Vec<_>>(), vec!["bottle", "can", "plastic bag"]);
  }

  #[test]
  fn toml_and_json_string_keys() {
    let labels = Labels::from_toml_str("[names]\n\"0\" = \"bottle\"\n\"1\" = \"can\"\n").unwrap();
    assert_eq!(labels.name_of(0), "bottle");

    let labels = Labels::from_json_str(r#"["bottle", "can"]"#).unwrap();
    assert_eq!(labels.name_of(1), "can");
  }

  #[test]
  fn gaps_and_empty_lists_are_rejected() {
    assert!(matches!(
      Labels::from_yaml_str("names:\n  0: bottle\n  2: can\n"),
      Err(LabelError::MissingIndex(1))
    ));
    assert!(matches!(
      Labels::from_json_str(r#"{"names": []}"#),
      Err(LabelError::Empty)
    ));
  }

  #[test]
  fn out_of_range_class_is_unknown() {
    let labels = Labels::new(["bottle"]);
    assert_eq!(labels.name_of(7), UNKNOWN_LABEL);
  }

  #[test]
  fn reads_from_file_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.yaml");
    std::fs::write(&path, "names: [bottle, can]\n").unwrap();
    assert_eq!(Labels::from_path(&path).unwrap().len(), 2);

    let path = dir.path().join("labels.txt");
    std::fs::write(&path, "bottle\n").unwrap();
    assert!(matches!(
      Labels::from_path(&path),
      Err(LabelError::UnsupportedFormat(_))
    ));
  }
}
