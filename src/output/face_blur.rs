// 该文件是 Tickscope 项目的一部分。
// src/output/face_blur.rs - 人脸区域模糊
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::ClassifiedBox,
  output::{Render, create_parent_dir, pixel_rect},
};

/// 低分辨率副本最长边的默认像素数
pub const DEFAULT_BLUR_RESOLUTION: u32 = 32;

#[derive(Error, Debug)]
pub enum FaceBlurError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("模糊分辨率无效: {0}")]
  InvalidResolution(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 用低分辨率副本覆盖每个检测区域
///
/// 副本的最长边为 `resolution` 像素，再以双线性插值放大回原尺寸，
/// 检测框之外的像素保持不变。
pub fn blur_regions(image: &RgbImage, items: &[ClassifiedBox], resolution: u32) -> RgbImage {
  let mut output = image.clone();
  if items.is_empty() || resolution == 0 {
    return output;
  }

  let (width, height) = image.dimensions();
  let scale = resolution as f32 / width.max(height) as f32;
  let low_width = ((width as f32 * scale).round() as u32).max(1);
  let low_height = ((height as f32 * scale).round() as u32).max(1);
  debug!("模糊副本尺寸: {}x{}", low_width, low_height);

  let low = image::imageops::resize(image, low_width, low_height, FilterType::Triangle);
  let blurred = image::imageops::resize(&low, width, height, FilterType::Triangle);

  for detection in items {
    let Some((x_min, y_min, x_max, y_max)) = pixel_rect(image, detection.to_unit_corners()) else {
      continue;
    };
    for y in y_min..=y_max {
      for x in x_min..=x_max {
        output.put_pixel(x, y, *blurred.get_pixel(x, y));
      }
    }
  }

  output
}

/// 模糊所有人脸后保存到文件
pub struct FaceBlurOutput {
  path: PathBuf,
  resolution: u32,
}

impl FromUrlWithScheme for FaceBlurOutput {
  const SCHEME: &'static str = "blur";
}

impl FromUrl for FaceBlurOutput {
  type Error = FaceBlurError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(FaceBlurError::SchemeMismatch);
    }

    let mut resolution = DEFAULT_BLUR_RESOLUTION;
    for (key, value) in uri.query_pairs() {
      if key == "resolution" {
        resolution = value
          .parse()
          .ok()
          .filter(|&r: &u32| r > 0)
          .ok_or_else(|| FaceBlurError::InvalidResolution(value.to_string()))?;
      }
    }

    Ok(FaceBlurOutput {
      path: PathBuf::from(uri.path()),
      resolution,
    })
  }
}

impl FaceBlurOutput {
  pub fn resolution(&self) -> u32 {
    self.resolution
  }
}

impl Render<RgbImage, [ClassifiedBox]> for FaceBlurOutput {
  type Error = FaceBlurError;

  fn render_result(&self, frame: &RgbImage, result: &[ClassifiedBox]) -> Result<(), Self::Error> {
    let image = blur_regions(frame, result, self.resolution);
    create_parent_dir(&self.path)?;
    image.save(&self.path)?;
    info!("模糊 {} 个区域并保存到: {}", result.len(), self.path.display());
    Ok(())
  }
}
