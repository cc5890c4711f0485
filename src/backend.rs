// 该文件是 Tickscope 项目的一部分。
// src/backend.rs - 推理后端抽象
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

use crate::tensor::{Shape, Tensor};

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("设备错误: {0}")]
  Device(String),
}

/// 模型输出槽位：0 号为框，1 号为标签或分数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
  Primary,
  Secondary,
}

impl OutputSlot {
  pub fn index(self) -> usize {
    match self {
      OutputSlot::Primary => 0,
      OutputSlot::Secondary => 1,
    }
  }
}

/// 位于设备内存中的输出张量
///
/// 回读是非阻塞的：先 `request_readback`，之后每帧轮询 `is_readback_done`。
/// 句柄被 drop 时释放设备侧资源。
pub trait DeviceTensor {
  fn shape(&self) -> &Shape;
  fn request_readback(&mut self);
  fn is_readback_done(&self) -> bool;
  fn readback_and_clone(&self) -> Tensor;
}

/// 可按工作单元（层）分片执行的前向计算
pub trait InferenceBackend {
  /// 设置输入并准备新的一次前向计算，之前未完成的计算被丢弃
  fn schedule(&mut self, input: &Tensor) -> Result<(), BackendError>;

  /// 执行下一个工作单元；没有剩余单元时返回 `false`
  fn next_work_unit(&mut self) -> bool;

  fn is_scheduled_complete(&self) -> bool;

  /// 取得输出句柄；后端没有产出任何数据时返回 `None`
  fn peek_output(&mut self, slot: OutputSlot) -> Option<Box<dyn DeviceTensor>>;
}

mod replay;
pub use self::replay::{CapturedDType, CapturedTensor, ReplayBackend, ReplayCapture, ReplayError};
