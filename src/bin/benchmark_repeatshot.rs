// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理测速
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use sampah::{
  FromUrl,
  config::{ModelSelector, PipelineConfig},
  input::ImageFileInput,
  task::{Pipeline, RepeatShotTask, Task},
};

/// Sampah 测速参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  /// 输入图像，例如 image:///data/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 使用的模型
  #[arg(long, value_enum, default_value_t = ModelSelector::Pieces)]
  pub model: ModelSelector,
  /// 重复次数
  #[arg(long, default_value_t = 1000)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeat);

  let config = PipelineConfig::from_path(&args.config)?;
  let pipeline = Pipeline::from_config(&config)?;
  let input = ImageFileInput::from_url(&args.input)?;

  let report = RepeatShotTask {
    selector: args.model,
    repeat: args.repeat,
  }
  .run_task(input, &pipeline)?;

  info!(
    "共 {} 次，平均耗时 {:.2?}，最后一次总积分 {}",
    report.runs, report.average, report.outcome.total_point
  );

  Ok(())
}
