// 该文件是 Tickscope 项目的一部分。
// src/tensor.rs - 主机侧张量定义
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

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("数据长度不匹配: 形状 {shape:?} 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量类型不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  DTypeMismatch { expected: DType, actual: DType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
  F32,
  I32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Shape {
  dims: Vec<usize>,
}

impl Shape {
  pub fn new(dims: impl Into<Vec<usize>>) -> Self {
    Self { dims: dims.into() }
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  /// 第一维的大小，零维张量视为 0 行
  pub fn rows(&self) -> usize {
    self.dims.first().copied().unwrap_or(0)
  }

  /// 元素总数
  pub fn len(&self) -> usize {
    if self.dims.is_empty() {
      0
    } else {
      self.dims.iter().product()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl From<&[usize]> for Shape {
  fn from(dims: &[usize]) -> Self {
    Shape::new(dims.to_vec())
  }
}

impl<const N: usize> From<[usize; N]> for Shape {
  fn from(dims: [usize; N]) -> Self {
    Shape::new(dims.to_vec())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  F32(Box<[f32]>),
  I32(Box<[i32]>),
}

impl TensorData {
  pub fn dtype(&self) -> DType {
    match self {
      TensorData::F32(_) => DType::F32,
      TensorData::I32(_) => DType::I32,
    }
  }

  fn len(&self) -> usize {
    match self {
      TensorData::F32(data) => data.len(),
      TensorData::I32(data) => data.len(),
    }
  }
}

/// 连续存储的主机张量
///
/// 张量由最后一个请求它的组件独占，释放即 `Drop`，不存在共享别名。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Shape,
  data: TensorData,
}

impl Tensor {
  pub fn new(shape: impl Into<Shape>, data: TensorData) -> Result<Self, TensorError> {
    let shape = shape.into();
    if data.len() != shape.len() {
      return Err(TensorError::LengthMismatch {
        shape: shape.dims().to_vec(),
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn from_f32(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::F32(data.into_boxed_slice()))
  }

  pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::I32(data.into_boxed_slice()))
  }

  pub fn zeros_f32(shape: impl Into<Shape>) -> Self {
    let shape = shape.into();
    let data = vec![0.0f32; shape.len()].into_boxed_slice();
    Self {
      shape,
      data: TensorData::F32(data),
    }
  }

  /// 形状为 `[0]` 的空张量，表示“没有任何行”
  pub fn empty(dtype: DType) -> Self {
    let data = match dtype {
      DType::F32 => TensorData::F32(Box::new([])),
      DType::I32 => TensorData::I32(Box::new([])),
    };
    Self {
      shape: Shape::new([0]),
      data,
    }
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dtype(&self) -> DType {
    self.data.dtype()
  }

  pub fn rows(&self) -> usize {
    self.shape.rows()
  }

  pub fn as_f32(&self) -> Result<&[f32], TensorError> {
    match &self.data {
      TensorData::F32(data) => Ok(data),
      other => Err(TensorError::DTypeMismatch {
        expected: DType::F32,
        actual: other.dtype(),
      }),
    }
  }

  pub fn as_f32_mut(&mut self) -> Result<&mut [f32], TensorError> {
    match &mut self.data {
      TensorData::F32(data) => Ok(data),
      other => Err(TensorError::DTypeMismatch {
        expected: DType::F32,
        actual: other.dtype(),
      }),
    }
  }

  pub fn as_i32(&self) -> Result<&[i32], TensorError> {
    match &self.data {
      TensorData::I32(data) => Ok(data),
      other => Err(TensorError::DTypeMismatch {
        expected: DType::I32,
        actual: other.dtype(),
      }),
    }
  }
}
