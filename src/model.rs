// 该文件是 Tickscope 项目的一部分。
// src/model.rs - 检测结果与模型输出解码
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

use serde::Serialize;
use tracing::warn;

use crate::{config::PipelineConfig, tensor::Tensor};

/// 两个框中心距离小于较大对角线的这一比例时视为同一目标
const COLLISION_MARGIN_RATIO: f32 = 0.5;

/// 归一化图像空间中的分类框
///
/// 坐标以图像中心为原点，取值范围约为 `[-0.5, 0.5]`，y 轴向下。
/// 创建后不可修改，合并总是产生新的框。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedBox {
  center_x: f32,
  center_y: f32,
  width: f32,
  height: f32,
  class_index: i32,
  class_name: String,
}

impl ClassifiedBox {
  pub fn new(
    center_x: f32,
    center_y: f32,
    width: f32,
    height: f32,
    class_index: i32,
    class_name: impl Into<String>,
  ) -> Self {
    Self {
      center_x,
      center_y,
      width,
      height,
      class_index,
      class_name: class_name.into(),
    }
  }

  /// 由 `[0, 1]` 范围的角点坐标 `[x1, y1, x2, y2]` 创建
  pub fn from_unit_corners(corners: [f32; 4], class_index: i32, class_name: impl Into<String>) -> Self {
    let [x1, y1, x2, y2] = corners;
    Self::new(
      (x1 + x2) / 2.0 - 0.5,
      (y1 + y2) / 2.0 - 0.5,
      x2 - x1,
      y2 - y1,
      class_index,
      class_name,
    )
  }

  /// 转回 `[0, 1]` 范围的角点坐标 `[x1, y1, x2, y2]`
  pub fn to_unit_corners(&self) -> [f32; 4] {
    let x1 = self.center_x + 0.5 - self.width / 2.0;
    let y1 = self.center_y + 0.5 - self.height / 2.0;
    [x1, y1, x1 + self.width, y1 + self.height]
  }

  pub fn center_x(&self) -> f32 {
    self.center_x
  }

  pub fn center_y(&self) -> f32 {
    self.center_y
  }

  pub fn width(&self) -> f32 {
    self.width
  }

  pub fn height(&self) -> f32 {
    self.height
  }

  pub fn class_index(&self) -> i32 {
    self.class_index
  }

  pub fn class_name(&self) -> &str {
    &self.class_name
  }

  pub fn hypotenuse(&self) -> f32 {
    (self.width * self.width + self.height * self.height).sqrt()
  }

  pub fn center_distance(&self, other: &Self) -> f32 {
    let dx = self.center_x - other.center_x;
    let dy = self.center_y - other.center_y;
    (dx * dx + dy * dy).sqrt()
  }

  /// 同类且中心距离小于任一框对角线的一半
  pub fn collides(&self, other: &Self) -> bool {
    if self.class_name != other.class_name {
      return false;
    }
    let margin = self.hypotenuse().max(other.hypotenuse()) * COLLISION_MARGIN_RATIO;
    self.center_distance(other) < margin
  }

  /// 逐分量取平均，类别沿用 `self`
  pub fn average(&self, other: &Self) -> Self {
    if self.class_name != other.class_name {
      warn!("合并的两个框类别不一致: {} 与 {}", self.class_name, other.class_name);
    }
    Self {
      center_x: (self.center_x + other.center_x) * 0.5,
      center_y: (self.center_y + other.center_y) * 0.5,
      width: (self.width + other.width) * 0.5,
      height: (self.height + other.height) * 0.5,
      class_index: self.class_index,
      class_name: self.class_name.clone(),
    }
  }
}

/// 带分数的候选框，分数只在过滤与 IoU 抑制阶段使用
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub detection: ClassifiedBox,
  pub score: f32,
}

/// 一次请求的最终结果，连同提交时的源图像句柄一起交还给调用方
#[derive(Debug, Clone)]
pub struct DetectResult<S> {
  pub source: S,
  pub items: Box<[ClassifiedBox]>,
}

impl<S> DetectResult<S> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

/// 将模型的两个主机侧输出转换为候选框
///
/// 任一输出为空张量时应返回空列表而不是报错。
pub trait OutputDecoder {
  fn decode(&self, primary: &Tensor, secondary: &Tensor, config: &PipelineConfig) -> Vec<Candidate>;

  /// 去重之后最多保留的结果数
  fn max_results(&self) -> Option<usize> {
    None
  }
}

mod classifier;
mod face;
mod labels;
mod prior;

pub use self::classifier::{CLASSIFIER_INPUT_SIZE, ObjectClassifierDecoder};
pub use self::face::{
  FACE_CLASS_NAME, FACE_INPUT_SIZE, FACE_MAX_RESULTS, FACE_PIXEL_MEANS, FaceDetectorDecoder,
};
pub use self::labels::{COCO_CLASSES, LabelTable, UNKNOWN_LABEL};
pub use self::prior::{
  DecodedBox, LOC_VARIANCES, PRIOR_MIN_SIZES, PRIOR_STEPS, Prior, PriorTable, decode_boxes, decode_one,
};
