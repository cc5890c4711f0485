// 该文件是 Tickscope 项目的一部分。
// src/postprocess/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use crate::model::{Candidate, ClassifiedBox};

/// 按类别执行非极大值抑制
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  // 按分数降序排序
  candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  let mut result = Vec::new();
  let mut remaining = candidates.into_iter();
  while let Some(best) = remaining.next() {
    let rest: Vec<Candidate> = remaining
      .filter(|candidate| {
        candidate.detection.class_name() != best.detection.class_name()
          || iou(&best.detection, &candidate.detection) < iou_threshold
      })
      .collect();
    result.push(best);
    remaining = rest.into_iter();
  }

  result
}

/// 计算两个边界框的 IoU
pub fn iou(a: &ClassifiedBox, b: &ClassifiedBox) -> f32 {
  let [ax1, ay1, ax2, ay2] = corners(a);
  let [bx1, by1, bx2, by2] = corners(b);

  let x1 = ax1.max(bx1);
  let y1 = ay1.max(by1);
  let x2 = ax2.min(bx2);
  let y2 = ay2.min(by2);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = a.width() * a.height();
  let area_b = b.width() * b.height();
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

fn corners(b: &ClassifiedBox) -> [f32; 4] {
  let half_w = b.width() / 2.0;
  let half_h = b.height() / 2.0;
  [
    b.center_x() - half_w,
    b.center_y() - half_h,
    b.center_x() + half_w,
    b.center_y() + half_h,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(class_name: &str, cx: f32, score: f32) -> Candidate {
    Candidate {
      detection: ClassifiedBox::new(cx, 0.0, 0.2, 0.2, 0, class_name),
      score,
    }
  }

  #[test]
  fn identical_boxes_have_unit_iou() {
    let a = ClassifiedBox::new(0.0, 0.0, 0.5, 0.5, 0, "face");
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = ClassifiedBox::new(-0.3, 0.0, 0.2, 0.2, 0, "face");
    let b = ClassifiedBox::new(0.3, 0.0, 0.2, 0.2, 0, "face");
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn keeps_the_highest_score_of_an_overlapping_group() {
    let kept = non_max_suppression(
      vec![
        candidate("face", 0.0, 0.6),
        candidate("face", 0.01, 0.9),
        candidate("face", 0.3, 0.7),
      ],
      0.45,
    );
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn suppression_is_per_class() {
    let kept = non_max_suppression(vec![candidate("face", 0.0, 0.9), candidate("cup", 0.0, 0.8)], 0.45);
    assert_eq!(kept.len(), 2);
  }
}
