// 该文件是 Tickscope 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::model::ClassifiedBox;
use crate::{FromUrl, FromUrlWithScheme};

pub trait Render<Frame, Output: ?Sized>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub(crate) fn create_parent_dir(path: &Path) -> std::io::Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
    _ => Ok(()),
  }
}

/// 将 `[0, 1]` 角点坐标转换为图像内的像素矩形，完全落在图像外时返回 `None`
#[cfg(any(feature = "save_image_file", feature = "face_blur"))]
pub(crate) fn pixel_rect(image: &RgbImage, corners: [f32; 4]) -> Option<(u32, u32, u32, u32)> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  if w < 1.0 || h < 1.0 {
    return None;
  }

  let x_min = (corners[0] * w).floor().clamp(0.0, w - 1.0) as u32;
  let y_min = (corners[1] * h).floor().clamp(0.0, h - 1.0) as u32;
  let x_max = (corners[2] * w).ceil().clamp(0.0, w - 1.0) as u32;
  let y_max = (corners[3] * h).ceil().clamp(0.0, h - 1.0) as u32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some((x_min, y_min, x_max, y_max))
}

#[cfg(feature = "save_image_file")]
mod draw;
#[cfg(feature = "save_image_file")]
pub use self::draw::Draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "face_blur")]
mod face_blur;
#[cfg(feature = "face_blur")]
pub use self::face_blur::{DEFAULT_BLUR_RESOLUTION, FaceBlurError, FaceBlurOutput, blur_regions};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "face_blur")]
  #[error("人脸模糊输出错误: {0}")]
  FaceBlurError(#[from] FaceBlurError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "face_blur")]
  FaceBlurOutput(FaceBlurOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "face_blur")]
      FaceBlurOutput::SCHEME => {
        let output = FaceBlurOutput::from_url(url)?;
        Ok(OutputWrapper::FaceBlurOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<RgbImage, [ClassifiedBox]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &[ClassifiedBox]) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "face_blur")]
      OutputWrapper::FaceBlurOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
