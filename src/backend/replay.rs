// 该文件是 Tickscope 项目的一部分。
// src/backend/replay.rs - 回放后端
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

//! 回放从真实设备抓取的模型输出。
//!
//! 抓取文件记录了前向计算的层数、回读所需的轮询次数以及各输出张量，
//! 使调度与后处理可以在没有设备的环境中按真实节奏运行。

use std::cell::Cell;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  backend::{BackendError, DeviceTensor, InferenceBackend, OutputSlot},
  tensor::{Shape, Tensor, TensorError},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("抓取文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("抓取张量无效: {0}")]
  TensorError(#[from] TensorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturedDType {
  F32,
  I32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedTensor {
  pub dtype: CapturedDType,
  pub shape: Vec<usize>,
  pub data: Vec<f64>,
}

impl CapturedTensor {
  fn to_tensor(&self) -> Result<Tensor, TensorError> {
    let shape = Shape::new(self.shape.clone());
    match self.dtype {
      CapturedDType::F32 => Tensor::from_f32(shape, self.data.iter().map(|&v| v as f32).collect()),
      CapturedDType::I32 => Tensor::from_i32(shape, self.data.iter().map(|&v| v as i32).collect()),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayCapture {
  pub input_shape: Vec<usize>,
  pub work_units: usize,
  #[serde(default)]
  pub readback_polls: usize,
  /// `null` 表示该槽位在后端上没有数据
  pub outputs: Vec<Option<CapturedTensor>>,
}

impl ReplayCapture {
  pub fn from_json_str(json: &str) -> Result<Self, ReplayError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
    let path = path.as_ref();
    info!("加载抓取文件: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }
}

pub struct ReplayBackend {
  input_shape: Shape,
  work_units: usize,
  readback_polls: usize,
  outputs: Vec<Option<Tensor>>,
  remaining: Option<usize>,
}

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }
    ReplayBackend::new(ReplayCapture::load(url.path())?)
  }
}

impl ReplayBackend {
  pub fn new(capture: ReplayCapture) -> Result<Self, ReplayError> {
    let outputs = capture
      .outputs
      .iter()
      .map(|output| output.as_ref().map(CapturedTensor::to_tensor).transpose())
      .collect::<Result<Vec<_>, _>>()?;

    debug!(
      "回放后端: {} 个工作单元, 回读轮询 {} 次, {} 个输出",
      capture.work_units,
      capture.readback_polls,
      outputs.len()
    );

    Ok(Self {
      input_shape: Shape::new(capture.input_shape),
      work_units: capture.work_units,
      readback_polls: capture.readback_polls,
      outputs,
      remaining: None,
    })
  }

  pub fn input_shape(&self) -> &Shape {
    &self.input_shape
  }
}

impl InferenceBackend for ReplayBackend {
  fn schedule(&mut self, input: &Tensor) -> Result<(), BackendError> {
    if input.shape() != &self.input_shape {
      return Err(BackendError::InputShape {
        expected: self.input_shape.dims().to_vec(),
        actual: input.shape().dims().to_vec(),
      });
    }
    self.remaining = Some(self.work_units);
    Ok(())
  }

  fn next_work_unit(&mut self) -> bool {
    match self.remaining.as_mut() {
      Some(remaining) if *remaining > 0 => {
        *remaining -= 1;
        true
      }
      _ => false,
    }
  }

  fn is_scheduled_complete(&self) -> bool {
    self.remaining == Some(0)
  }

  fn peek_output(&mut self, slot: OutputSlot) -> Option<Box<dyn DeviceTensor>> {
    if !self.is_scheduled_complete() {
      return None;
    }
    let tensor = self.outputs.get(slot.index())?.as_ref()?.clone();
    Some(Box::new(ReplayDeviceTensor {
      tensor,
      polls_left: Cell::new(self.readback_polls),
      requested: false,
    }))
  }
}

struct ReplayDeviceTensor {
  tensor: Tensor,
  polls_left: Cell<usize>,
  requested: bool,
}

impl DeviceTensor for ReplayDeviceTensor {
  fn shape(&self) -> &Shape {
    self.tensor.shape()
  }

  fn request_readback(&mut self) {
    self.requested = true;
  }

  fn is_readback_done(&self) -> bool {
    if !self.requested {
      return false;
    }
    match self.polls_left.get() {
      0 => true,
      n => {
        self.polls_left.set(n - 1);
        false
      }
    }
  }

  fn readback_and_clone(&self) -> Tensor {
    self.tensor.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const CAPTURE: &str = r#"{
    "input_shape": [1, 3, 4, 4],
    "work_units": 3,
    "readback_polls": 2,
    "outputs": [
      { "dtype": "f32", "shape": [1, 4], "data": [320, 320, 64, 64] },
      null
    ]
  }"#;

  #[test]
  fn parses_capture_and_replays_work_units() {
    let capture = ReplayCapture::from_json_str(CAPTURE).unwrap();
    let mut backend = ReplayBackend::new(capture).unwrap();
    backend.schedule(&Tensor::zeros_f32([1, 3, 4, 4])).unwrap();

    assert!(backend.peek_output(OutputSlot::Primary).is_none());
    assert!(backend.next_work_unit());
    assert!(backend.next_work_unit());
    assert!(backend.next_work_unit());
    assert!(!backend.next_work_unit());
    assert!(backend.is_scheduled_complete());
  }

  #[test]
  fn readback_completes_after_configured_polls() {
    let capture = ReplayCapture::from_json_str(CAPTURE).unwrap();
    let mut backend = ReplayBackend::new(capture).unwrap();
    backend.schedule(&Tensor::zeros_f32([1, 3, 4, 4])).unwrap();
    while backend.next_work_unit() {}

    let mut output = backend.peek_output(OutputSlot::Primary).unwrap();
    assert!(!output.is_readback_done());
    output.request_readback();
    assert!(!output.is_readback_done());
    assert!(!output.is_readback_done());
    assert!(output.is_readback_done());
    assert_eq!(
      output.readback_and_clone().as_f32().unwrap(),
      &[320.0, 320.0, 64.0, 64.0]
    );
    assert!(backend.peek_output(OutputSlot::Secondary).is_none());
  }

  #[test]
  fn rejects_input_of_the_wrong_shape() {
    let capture = ReplayCapture::from_json_str(CAPTURE).unwrap();
    let mut backend = ReplayBackend::new(capture).unwrap();
    let err = backend.schedule(&Tensor::zeros_f32([1, 3, 8, 8])).unwrap_err();
    assert!(matches!(err, BackendError::InputShape { .. }));
  }

  #[test]
  fn rejects_captured_tensor_with_bad_length() {
    let json = r#"{
      "input_shape": [1],
      "work_units": 1,
      "outputs": [{ "dtype": "i32", "shape": [3], "data": [1, 2] }]
    }"#;
    let capture = ReplayCapture::from_json_str(json).unwrap();
    assert!(matches!(
      ReplayBackend::new(capture),
      Err(ReplayError::TensorError(_))
    ));
  }
}
