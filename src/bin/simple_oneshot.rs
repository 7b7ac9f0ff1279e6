// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测与计分
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
use tracing::{info, warn};
use url::Url;

use sampah::{
  FromUrl,
  config::{ModelSelector, PipelineConfig},
  input::ImageFileInput,
  model::Thresholds,
  output::{OutputWrapper, draw::Draw},
  task::{OneShotTask, Pipeline, Task},
};

/// Sampah 单次检测参数
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
  /// 输出位置，例如 image:///srv/detected 或 folder:///srv/records，缺省使用配置文件
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值
  #[arg(long)]
  pub confidence: Option<f32>,
  /// NMS IoU 阈值
  #[arg(long)]
  pub iou: Option<f32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输入来源: {}", args.input);
  info!("模型: {:?}", args.model);

  let config = PipelineConfig::from_path(&args.config)?;
  let thresholds = Thresholds {
    confidence: args.confidence.unwrap_or(config.thresholds.confidence),
    iou: args.iou.unwrap_or(config.thresholds.iou),
  };
  let mut pipeline = Pipeline::from_config(&config)?.with_thresholds(thresholds)?;
  if let Some(url) = &args.output {
    info!("输出路径: {}", url);
    let mut output = OutputWrapper::from_url(url)?;
    if let Some(font) = &config.font {
      output = output.with_draw(Draw::with_font_file(font)?);
    }
    pipeline = pipeline.with_output(output);
  }

  let input = ImageFileInput::from_url(&args.input)?;
  match (OneShotTask {
    selector: args.model,
  })
  .run_task(input, &pipeline)
  {
    Ok(outcome) => {
      info!(
        "保存到 {}，总积分 {}",
        outcome.path.display(),
        outcome.total_point
      );
      println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Err(err) if err.is_no_detection() => {
      warn!("未检测到物体，请重新拍摄: {}", err);
    }
    Err(err) => return Err(err.into()),
  }

  Ok(())
}
