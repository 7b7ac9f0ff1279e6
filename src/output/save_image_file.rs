// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

/// 将标注图像写入指定目录下的指定文件名
pub struct SaveImageFileOutput {
  directory: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("文件名无效: {0}")]
  InvalidFilename(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  /// `image:///path/to/directory`
  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::new()?,
    })
  }
}

/// 只保留文件名部分，防止写到目标目录之外
pub(crate) fn plain_filename(filename: &str) -> Result<&str, SaveImageFileError> {
  Path::new(filename)
    .file_name()
    .and_then(|name| name.to_str())
    .filter(|name| *name == filename)
    .ok_or_else(|| SaveImageFileError::InvalidFilename(filename.to_string()))
}

impl SaveImageFileOutput {
  pub fn new<P: Into<PathBuf>>(directory: P, draw: Draw) -> Self {
    SaveImageFileOutput {
      directory: directory.into(),
      draw,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 保存图像，格式由文件扩展名决定
  pub fn save(&self, image: &RgbImage, filename: &str) -> Result<PathBuf, SaveImageFileError> {
    let path = self.directory.join(plain_filename(filename)?);
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&path)?;
    info!("保存图像到文件: {}", path.display());

    Ok(path)
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    image: &RgbImage,
    result: &DetectResult,
    filename: &str,
  ) -> Result<PathBuf, Self::Error> {
    let annotated = self.draw.draw(image, result);
    self.save(&annotated, filename)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn saves_under_directory_with_given_name() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path().join("detected"), Draw::new().unwrap());
    let image = RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]));

    let path = output
      .render_result(&image, &DetectResult::default(), "garbage_pcs_photo.png")
      .unwrap();
    assert_eq!(path, dir.path().join("detected").join("garbage_pcs_photo.png"));
    assert_eq!(image::open(&path).unwrap().into_rgb8(), image);
  }

  #[test]
  fn rejects_paths_in_filename() {
    assert!(plain_filename("photo.jpg").is_ok());
    assert!(matches!(
      plain_filename("../escape.jpg"),
      Err(SaveImageFileError::InvalidFilename(_))
    ));
    assert!(plain_filename("").is_err());
  }
}
