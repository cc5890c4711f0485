// 该文件是 Tickscope 项目的一部分。
// src/model/classifier.rs - 通用物体分类器输出解码
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

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
  config::PipelineConfig,
  model::{Candidate, ClassifiedBox, LabelTable, OutputDecoder, UNKNOWN_LABEL},
  tensor::Tensor,
};

/// 模型输入边长（像素）
pub const CLASSIFIER_INPUT_SIZE: f32 = 640.0;

/// 解码已在设备上完成 NMS 的检测模型输出
///
/// 0 号输出为 `[N, 4]` 的 `(cx, cy, w, h)`，单位是模型输入像素；
/// 1 号输出为 `[N]` 的类别下标。模型不输出分数，候选分数固定为 1。
pub struct ObjectClassifierDecoder {
  labels: Arc<LabelTable>,
  input_width: f32,
  input_height: f32,
}

impl ObjectClassifierDecoder {
  pub fn new(labels: Arc<LabelTable>) -> Self {
    Self {
      labels,
      input_width: CLASSIFIER_INPUT_SIZE,
      input_height: CLASSIFIER_INPUT_SIZE,
    }
  }

  pub fn with_input_size(mut self, width: f32, height: f32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }
}

impl OutputDecoder for ObjectClassifierDecoder {
  fn decode(&self, boxes: &Tensor, label_ids: &Tensor, config: &PipelineConfig) -> Vec<Candidate> {
    // 兼容 `[N, 4]` 与 `[1, N, 4]` 两种布局
    let boxes_found = boxes.shape().len() / 4;
    let labels_found = label_ids.shape().len();
    if boxes_found != labels_found {
      warn!("输出数量不匹配: 框 {} 个, 标签 {} 个", boxes_found, labels_found);
    }
    if boxes.shape().len() != label_ids.shape().len() * 4 {
      warn!(
        "输出长度不匹配: 框 {} 个数值, 标签 {} 个数值",
        boxes.shape().len(),
        label_ids.shape().len()
      );
    }

    let count = boxes_found.min(labels_found).min(config.max_detections);
    if count == 0 {
      return Vec::new();
    }

    let (boxes, label_ids) = match (boxes.as_f32(), label_ids.as_i32()) {
      (Ok(boxes), Ok(label_ids)) => (boxes, label_ids),
      (Err(e), _) | (_, Err(e)) => {
        error!("分类器输出类型错误: {}", e);
        return Vec::new();
      }
    };

    // 显示平面边长为 1，中心为原点
    let (input_width, input_height) = (self.input_width, self.input_height);

    let candidates: Vec<Candidate> = boxes
      .chunks_exact(4)
      .zip(label_ids.iter())
      .take(count)
      .map(|(row, &label_index)| {
        let class_name = self.labels.get(label_index).unwrap_or_else(|| {
          warn!("未知的标签下标: {}", label_index);
          UNKNOWN_LABEL
        });
        Candidate {
          detection: ClassifiedBox::new(
            row[0] / input_width - 0.5,
            row[1] / input_height - 0.5,
            row[2] / input_width,
            row[3] / input_height,
            label_index,
            class_name,
          ),
          score: 1.0,
        }
      })
      .collect();

    debug!("分类器解码出 {} 个候选框", candidates.len());
    candidates
  }
}
