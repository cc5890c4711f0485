// 该文件是 Tickscope 项目的一部分。
// src/model/face.rs - 人脸检测模型输出解码
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
  model::{Candidate, ClassifiedBox, OutputDecoder, PriorTable, decode_boxes},
  tensor::Tensor,
};

pub const FACE_INPUT_SIZE: usize = 640;
pub const FACE_CLASS_NAME: &str = "face";
pub const FACE_MAX_RESULTS: usize = 32;
/// BGR 通道均值，输入在 `[0, 255]` 范围内减去
pub const FACE_PIXEL_MEANS: [f32; 3] = [104.0, 117.0, 123.0];

/// 基于先验框的人脸检测器
///
/// 0 号输出为 `[N, 4]` 的原始回归量，1 号输出为 `[N]` 的人脸分数，
/// 两者与先验框表逐行对应。
pub struct FaceDetectorDecoder {
  priors: Arc<PriorTable>,
}

impl FaceDetectorDecoder {
  pub fn new(priors: Arc<PriorTable>) -> Self {
    Self { priors }
  }

  pub fn priors(&self) -> &PriorTable {
    &self.priors
  }
}

impl OutputDecoder for FaceDetectorDecoder {
  fn decode(&self, loc: &Tensor, scores: &Tensor, _config: &PipelineConfig) -> Vec<Candidate> {
    if loc.shape().is_empty() || scores.shape().is_empty() {
      return Vec::new();
    }

    let boxes = match decode_boxes(loc, &self.priors) {
      Ok(boxes) => boxes,
      Err(e) => {
        error!("回归输出解码失败: {}", e);
        return Vec::new();
      }
    };
    let (boxes, scores) = match (boxes.as_f32(), scores.as_f32()) {
      (Ok(boxes), Ok(scores)) => (boxes, scores),
      (Err(e), _) | (_, Err(e)) => {
        error!("人脸输出类型错误: {}", e);
        return Vec::new();
      }
    };

    let rows = boxes.len() / 4;
    if rows != scores.len() {
      warn!("输出数量不匹配: 框 {} 个, 分数 {} 个", rows, scores.len());
    }

    let candidates: Vec<Candidate> = boxes
      .chunks_exact(4)
      .zip(scores.iter())
      .filter(|(_, score)| score.is_finite())
      .map(|(corners, &score)| Candidate {
        detection: ClassifiedBox::from_unit_corners(
          [corners[0], corners[1], corners[2], corners[3]],
          0,
          FACE_CLASS_NAME,
        ),
        score,
      })
      .collect();

    debug!("人脸解码出 {} 个候选框", candidates.len());
    candidates
  }

  fn max_results(&self) -> Option<usize> {
    Some(FACE_MAX_RESULTS)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::DType;

  #[test]
  fn decodes_against_the_shared_prior_table() {
    let priors = Arc::new(PriorTable::new(64));
    let decoder = FaceDetectorDecoder::new(priors.clone());

    let n = priors.len();
    let loc = Tensor::zeros_f32([n, 4]);
    let mut score_data = vec![0.0f32; n];
    score_data[0] = 0.9;
    let scores = Tensor::from_f32([n], score_data).unwrap();

    let candidates = decoder.decode(&loc, &scores, &PipelineConfig::default());
    assert_eq!(candidates.len(), n);

    let first = &candidates[0];
    let prior = priors.get(0).unwrap();
    assert_eq!(first.score, 0.9);
    assert_eq!(first.detection.class_name(), FACE_CLASS_NAME);
    assert!((first.detection.center_x() - (prior.cx - 0.5)).abs() < 1e-6);
    assert!((first.detection.width() - prior.width).abs() < 1e-6);
  }

  #[test]
  fn empty_scores_decode_to_nothing() {
    let decoder = FaceDetectorDecoder::new(Arc::new(PriorTable::new(64)));
    let loc = Tensor::zeros_f32([168, 4]);
    let candidates = decoder.decode(&loc, &Tensor::empty(DType::F32), &PipelineConfig::default());
    assert!(candidates.is_empty());
  }

  #[test]
  fn results_are_capped_at_32() {
    let decoder = FaceDetectorDecoder::new(Arc::new(PriorTable::new(64)));
    assert_eq!(decoder.max_results(), Some(FACE_MAX_RESULTS));
  }
}
