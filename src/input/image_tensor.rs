// 该文件是 Tickscope 项目的一部分。
// src/input/image_tensor.rs - 由 RGB 图像生成模型输入
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

use std::borrow::Cow;
use std::sync::Arc;

use image::{RgbImage, imageops::FilterType};
use tracing::trace;

use crate::{
  input::{TensorSource, TensorSourceError},
  model::{CLASSIFIER_INPUT_SIZE, FACE_INPUT_SIZE, FACE_PIXEL_MEANS},
  tensor::Tensor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelScale {
  /// 缩放到 `[0, 1]`
  Unit,
  /// 保持 `[0, 255]` 并按输出通道顺序减去均值
  MeanSubtracted([f32; 3]),
}

/// 缩放图像并写入 `[1, 3, H, W]` 输入张量
#[derive(Debug, Clone)]
pub struct ImageTensorSource {
  width: u32,
  height: u32,
  channel_order: ChannelOrder,
  pixel_scale: PixelScale,
}

impl ImageTensorSource {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      channel_order: ChannelOrder::Rgb,
      pixel_scale: PixelScale::Unit,
    }
  }

  /// 通用物体分类器：RGB，`[0, 1]`
  pub fn classifier() -> Self {
    let size = CLASSIFIER_INPUT_SIZE as u32;
    Self::new(size, size)
  }

  /// 人脸检测器：BGR，减均值
  pub fn face() -> Self {
    let size = FACE_INPUT_SIZE as u32;
    Self::new(size, size)
      .with_channel_order(ChannelOrder::Bgr)
      .with_pixel_scale(PixelScale::MeanSubtracted(FACE_PIXEL_MEANS))
  }

  pub fn with_channel_order(mut self, channel_order: ChannelOrder) -> Self {
    self.channel_order = channel_order;
    self
  }

  pub fn with_pixel_scale(mut self, pixel_scale: PixelScale) -> Self {
    self.pixel_scale = pixel_scale;
    self
  }

  pub fn input_shape(&self) -> [usize; 4] {
    [1, 3, self.height as usize, self.width as usize]
  }
}

impl TensorSource<RgbImage> for ImageTensorSource {
  fn to_tensor(&self, image: &RgbImage, into: &mut Tensor) -> Result<(), TensorSourceError> {
    if into.shape().dims() != &self.input_shape()[..] {
      return Err(TensorSourceError::UnexpectedShape(into.shape().dims().to_vec()));
    }

    let resized = if image.dimensions() == (self.width, self.height) {
      Cow::Borrowed(image)
    } else {
      trace!(
        "缩放输入图像: {:?} -> {}x{}",
        image.dimensions(),
        self.width,
        self.height
      );
      Cow::Owned(image::imageops::resize(
        image,
        self.width,
        self.height,
        FilterType::Triangle,
      ))
    };

    let plane = (self.width * self.height) as usize;
    let width = self.width as usize;
    let slice = into.as_f32_mut()?;

    for (x, y, pixel) in resized.enumerate_pixels() {
      let offset = y as usize * width + x as usize;
      for c in 0..3 {
        let source_channel = match self.channel_order {
          ChannelOrder::Rgb => c,
          ChannelOrder::Bgr => 2 - c,
        };
        let value = pixel[source_channel] as f32;
        slice[c * plane + offset] = match self.pixel_scale {
          PixelScale::Unit => value / 255.0,
          PixelScale::MeanSubtracted(means) => value - means[c],
        };
      }
    }

    Ok(())
  }
}

impl TensorSource<Arc<RgbImage>> for ImageTensorSource {
  fn to_tensor(&self, image: &Arc<RgbImage>, into: &mut Tensor) -> Result<(), TensorSourceError> {
    <Self as TensorSource<RgbImage>>::to_tensor(self, image.as_ref(), into)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn writes_channel_first_unit_values() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 51]));
    image.put_pixel(1, 0, Rgb([0, 255, 0]));

    let source = ImageTensorSource::new(2, 1);
    let mut input = Tensor::zeros_f32(source.input_shape());
    source.to_tensor(&image, &mut input).unwrap();

    assert_eq!(input.as_f32().unwrap(), &[1.0, 0.0, 0.0, 1.0, 0.2, 0.0]);
  }

  #[test]
  fn bgr_mean_subtraction_swaps_channels() {
    let mut image = RgbImage::new(1, 1);
    image.put_pixel(0, 0, Rgb([200, 150, 100]));

    let source = ImageTensorSource::new(1, 1)
      .with_channel_order(ChannelOrder::Bgr)
      .with_pixel_scale(PixelScale::MeanSubtracted(FACE_PIXEL_MEANS));
    let mut input = Tensor::zeros_f32(source.input_shape());
    source.to_tensor(&image, &mut input).unwrap();

    assert_eq!(input.as_f32().unwrap(), &[100.0 - 104.0, 150.0 - 117.0, 200.0 - 123.0]);
  }

  #[test]
  fn resizes_to_the_model_input() {
    let image = Arc::new(RgbImage::from_pixel(7, 3, Rgb([255, 255, 255])));
    let source = ImageTensorSource::new(4, 4);
    let mut input = Tensor::zeros_f32(source.input_shape());
    source.to_tensor(&image, &mut input).unwrap();
    assert!(input.as_f32().unwrap().iter().all(|&v| (v - 1.0).abs() < 0.01));
  }

  #[test]
  fn rejects_a_mismatched_target() {
    let image = RgbImage::new(4, 4);
    let mut input = Tensor::zeros_f32([1, 3, 2, 2]);
    assert!(ImageTensorSource::new(4, 4).to_tensor(&image, &mut input).is_err());
  }
}
