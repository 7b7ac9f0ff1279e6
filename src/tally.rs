// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/tally.rs - 检测结果计数与积分
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

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::Detection;

/// 垃圾堆模式下所有目标统一使用的类别名
pub const GARBAGE_PILE_NAME: &str = "Garbage";
/// 垃圾堆模式下所有目标统一使用的类别 ID
pub const GARBAGE_PILE_CATEGORY_ID: i64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TallyMode {
  /// 按模型输出的类别分别计数
  #[default]
  Discrete,
  /// 所有目标合并为一个 "Garbage" 类别
  GarbagePile,
}

#[derive(Error, Debug)]
pub enum PointTableError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("TOML 解析错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("不支持的积分表格式: {0}")]
  UnsupportedFormat(String),
}

/// 积分表条目：直接写积分，或者同时给出类别 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointEntry {
  Point(i64),
  Detailed {
    point: i64,
    #[serde(default)]
    category_id: Option<i64>,
  },
}

impl PointEntry {
  pub fn point(&self) -> i64 {
    match self {
      PointEntry::Point(point) | PointEntry::Detailed { point, .. } => *point,
    }
  }

  pub fn category_id(&self) -> Option<i64> {
    match self {
      PointEntry::Point(_) => None,
      PointEntry::Detailed { category_id, .. } => *category_id,
    }
  }
}

/// 类别名到积分/类别 ID 的查找表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointTable {
  entries: HashMap<String, PointEntry>,
}

impl PointTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_point(mut self, name: &str, point: i64) -> Self {
    self.entries.insert(name.to_string(), PointEntry::Point(point));
    self
  }

  pub fn with_entry(mut self, name: &str, point: i64, category_id: i64) -> Self {
    self.entries.insert(
      name.to_string(),
      PointEntry::Detailed {
        point,
        category_id: Some(category_id),
      },
    );
    self
  }

  /// 按扩展名读取 `.toml` 或 `.json` 积分表
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PointTableError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let extension = path
      .extension()
      .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
      .unwrap_or_default();
    let table: PointTable = match extension.as_str() {
      "toml" => toml::from_str(&content)?,
      "json" => serde_json::from_str(&content)?,
      other => return Err(PointTableError::UnsupportedFormat(other.to_string())),
    };
    debug!("从 {} 读取 {} 条积分规则", path.display(), table.len());
    Ok(table)
  }

  /// 类别名区分大小写，未配置的类别积分为 0
  pub fn point(&self, name: &str) -> i64 {
    self.entries.get(name).map(PointEntry::point).unwrap_or(0)
  }

  pub fn category_id(&self, name: &str) -> Option<i64> {
    self.entries.get(name).and_then(PointEntry::category_id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountObject {
  pub name: String,
  pub count: usize,
  pub point: i64,
}

/// 每个检测目标对应的下游类别 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
  pub category_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
  /// 按类别首次出现的顺序排列
  pub counts: Vec<CountObject>,
  /// 与检测结果一一对应
  pub items: Vec<ReportItem>,
  pub total_point: i64,
}

/// 逐个累加检测结果的计数器
#[derive(Debug, Default)]
pub struct ObjectTally {
  counts: IndexMap<String, CountObject>,
  items: Vec<ReportItem>,
  total_point: i64,
}

impl ObjectTally {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, name: &str, category_id: i64, point: i64) {
    let entry = self
      .counts
      .entry(name.to_string())
      .or_insert_with(|| CountObject {
        name: name.to_string(),
        count: 0,
        point: 0,
      });
    entry.count += 1;
    entry.point += point;
    self.total_point += point;
    self.items.push(ReportItem { category_id });
  }

  pub fn finish(self) -> TallyReport {
    TallyReport {
      counts: self.counts.into_values().collect(),
      items: self.items,
      total_point: self.total_point,
    }
  }
}

/// 按类别名汇总检测结果
///
/// 普通模式下类别 ID 取积分表中的配置，没有配置时使用模型的类别索引；
/// 垃圾堆模式下所有目标记为 "Garbage"，类别 ID 固定为 60。
pub fn tally(detections: &[Detection], points: &PointTable, mode: TallyMode) -> TallyReport {
  let mut tally = ObjectTally::new();
  for detection in detections {
    let (name, category_id) = match mode {
      TallyMode::Discrete => (
        detection.class_name.as_str(),
        points
          .category_id(&detection.class_name)
          .unwrap_or(detection.class_id as i64),
      ),
      TallyMode::GarbagePile => (GARBAGE_PILE_NAME, GARBAGE_PILE_CATEGORY_ID),
    };
    tally.push(name, category_id, points.point(name));
  }

  let report = tally.finish();
  debug!(
    "计数结果: {} 个类别, {} 个目标, 总积分 {}",
    report.counts.len(),
    report.items.len(),
    report.total_point
  );
  report
}
