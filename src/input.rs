// 该文件是 Tickscope 项目的一部分。
// src/input.rs - 模型输入张量的生成
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

use thiserror::Error;

use crate::tensor::{Tensor, TensorError};

#[derive(Error, Debug)]
pub enum TensorSourceError {
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("输入张量形状不支持: {0:?}")]
  UnexpectedShape(Vec<usize>),
}

/// 将源图像转换为模型输入张量
///
/// 目标张量由调度器持有并在每次请求间复用，形状固定为 `[1, 3, H, W]`。
pub trait TensorSource<I> {
  fn to_tensor(&self, image: &I, into: &mut Tensor) -> Result<(), TensorSourceError>;
}

/// 源本身已经是张量，直接复制
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSource;

impl TensorSource<Tensor> for PassthroughSource {
  fn to_tensor(&self, image: &Tensor, into: &mut Tensor) -> Result<(), TensorSourceError> {
    if image.shape() != into.shape() {
      return Err(TensorSourceError::UnexpectedShape(image.shape().dims().to_vec()));
    }
    into.as_f32_mut()?.copy_from_slice(image.as_f32()?);
    Ok(())
  }
}

#[cfg(feature = "image")]
mod image_tensor;
#[cfg(feature = "image")]
pub use self::image_tensor::{ChannelOrder, ImageTensorSource, PixelScale};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};
