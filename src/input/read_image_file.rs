// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::io::{BufRead, Cursor, Seek};
use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage, ImageDecoder, ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum InvalidImageError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("图像数据为空")]
  Empty,
  #[error("图像尺寸为零: {width}x{height}")]
  ZeroSized { width: u32, height: u32 },
  #[error("不支持的颜色类型: {0:?}，需要三通道或四通道彩色图像")]
  UnsupportedChannels(ColorType),
}

/// 检查图像尺寸，零宽或零高的图像不能进入推理
pub fn validate_image(image: &RgbImage) -> Result<(), InvalidImageError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(InvalidImageError::ZeroSized { width, height });
  }
  Ok(())
}

/// 解码并按 EXIF 方向摆正
fn decode_upright<R: BufRead + Seek>(
  reader: ImageReader<R>,
) -> Result<DynamicImage, InvalidImageError> {
  let mut decoder = reader.with_guessed_format()?.into_decoder()?;
  let orientation = decoder.orientation()?;
  let mut image = DynamicImage::from_decoder(decoder)?;
  debug!("图像方向: {:?}", orientation);
  image.apply_orientation(orientation);
  Ok(image)
}

fn into_rgb(image: DynamicImage) -> Result<RgbImage, InvalidImageError> {
  let color = image.color();
  if color.channel_count() < 3 {
    return Err(InvalidImageError::UnsupportedChannels(color));
  }
  let image = image.into_rgb8();
  validate_image(&image)?;
  Ok(image)
}

/// 单张图像输入
pub struct ImageFileInput {
  filename: String,
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InvalidImageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InvalidImageError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    Self::open(PathBuf::from(url.path()))
  }
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InvalidImageError> {
    let path = path.as_ref();
    let image = decode_upright(ImageReader::open(path)?)?;
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| "image.png".to_string());
    debug!("读取图像文件: {}", path.display());

    Ok(ImageFileInput {
      filename,
      image: Some(into_rgb(image)?),
    })
  }

  /// 从内存中的编码数据（JPEG/PNG 等）解码图像
  pub fn from_bytes(bytes: &[u8], filename: &str) -> Result<Self, InvalidImageError> {
    if bytes.is_empty() {
      return Err(InvalidImageError::Empty);
    }
    let image = decode_upright(ImageReader::new(Cursor::new(bytes)))?;

    Ok(ImageFileInput {
      filename: filename.to_string(),
      image: Some(into_rgb(image)?),
    })
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn image(&self) -> Option<&RgbImage> {
    self.image.as_ref()
  }

  pub fn into_image(self) -> Option<RgbImage> {
    self.image
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::codecs::jpeg::JpegEncoder;
  use image::codecs::png::PngEncoder;
  use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageFormat, Rgb};

  /// 小端 TIFF 头 + 仅含 Orientation 标签的 IFD
  fn exif_orientation(value: u16) -> Vec<u8> {
    let mut chunk = vec![0x49, 0x49, 42, 0, 8, 0, 0, 0, 1, 0];
    chunk.extend_from_slice(&0x0112u16.to_le_bytes());
    chunk.extend_from_slice(&3u16.to_le_bytes());
    chunk.extend_from_slice(&1u32.to_le_bytes());
    chunk.extend_from_slice(&value.to_le_bytes());
    chunk.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    chunk
  }

  fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decodes_png_bytes() {
    let image = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
    let bytes = encode_png(&DynamicImage::ImageRgb8(image.clone()));

    let input = ImageFileInput::from_bytes(&bytes, "sample.png").unwrap();
    assert_eq!(input.filename(), "sample.png");
    assert_eq!(input.into_image().unwrap(), image);
  }

  #[test]
  fn rejects_empty_and_garbage_bytes() {
    assert!(matches!(
      ImageFileInput::from_bytes(&[], "empty.jpg"),
      Err(InvalidImageError::Empty)
    ));
    assert!(ImageFileInput::from_bytes(b"definitely not an image", "x.jpg").is_err());
  }

  #[test]
  fn rejects_single_channel_images() {
    let gray = DynamicImage::ImageLuma8(GrayImage::new(4, 4));
    let bytes = encode_png(&gray);
    assert!(matches!(
      ImageFileInput::from_bytes(&bytes, "gray.png"),
      Err(InvalidImageError::UnsupportedChannels(_))
    ));
  }

  #[test]
  fn rejects_zero_sized_image() {
    let image = RgbImage::new(0, 5);
    assert!(matches!(
      validate_image(&image),
      Err(InvalidImageError::ZeroSized { .. })
    ));
  }

  #[test]
  fn reads_from_url_and_iterates_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.filename(), "frame.png");
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn scheme_mismatch_is_reported() {
    let url = Url::parse("video:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InvalidImageError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn png_exif_rotation_is_applied() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));

    let mut bytes = Vec::new();
    let mut encoder = PngEncoder::new(&mut bytes);
    // 6: 顺时针旋转 90 度
    encoder.set_exif_metadata(exif_orientation(6)).unwrap();
    encoder
      .write_image(image.as_raw(), 4, 2, ExtendedColorType::Rgb8)
      .unwrap();

    let upright = ImageFileInput::from_bytes(&bytes, "phone.png")
      .unwrap()
      .into_image()
      .unwrap();
    assert_eq!(upright.dimensions(), (2, 4));
    assert_eq!(upright.get_pixel(1, 0), &Rgb([255, 0, 0]));
    assert_eq!(upright.get_pixel(0, 0), &Rgb([0, 0, 0]));
  }

  #[test]
  fn jpeg_exif_rotation_swaps_dimensions() {
    let image = RgbImage::from_pixel(16, 8, Rgb([200, 120, 40]));

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 95);
    encoder.set_exif_metadata(exif_orientation(8)).unwrap();
    encoder
      .write_image(image.as_raw(), 16, 8, ExtendedColorType::Rgb8)
      .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phone.jpg");
    std::fs::write(&path, &bytes).unwrap();

    let from_bytes = ImageFileInput::from_bytes(&bytes, "phone.jpg")
      .unwrap()
      .into_image()
      .unwrap();
    let from_file = ImageFileInput::open(&path).unwrap().into_image().unwrap();
    assert_eq!(from_bytes.dimensions(), (8, 16));
    assert_eq!(from_file.dimensions(), (8, 16));
  }

  #[test]
  fn images_without_exif_keep_their_layout() {
    let image = RgbImage::from_pixel(5, 3, Rgb([7, 8, 9]));
    let bytes = encode_png(&DynamicImage::ImageRgb8(image.clone()));
    let decoded = ImageFileInput::from_bytes(&bytes, "flat.png")
      .unwrap()
      .into_image()
      .unwrap();
    assert_eq!(decoded, image);
  }
}
