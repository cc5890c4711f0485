// 该文件是 Tickscope 项目的一部分。
// src/postprocess/merge.rs - 合并式聚类去重
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

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::model::ClassifiedBox;
use crate::postprocess::MERGES_PER_TICK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeProgress {
  Pending,
  Done,
}

/// 可分多次推进的合并聚类
///
/// 每次从 `pending` 头部取出一个框，与已接受的框逐一比较；
/// 遇到第一个碰撞的框时将其移出，两者的平均值放回 `pending` 尾部重新参与比较。
/// 每次合并都会让框的总数减少一个，因此过程必然结束。
#[derive(Debug, Clone)]
pub struct MergeClustering {
  pending: VecDeque<ClassifiedBox>,
  accepted: Vec<ClassifiedBox>,
  merges: usize,
}

impl MergeClustering {
  pub fn new(detections: impl IntoIterator<Item = ClassifiedBox>, ignore: &BTreeSet<String>) -> Self {
    let pending: VecDeque<ClassifiedBox> = detections
      .into_iter()
      .filter(|detection| !ignore.contains(detection.class_name()))
      .collect();
    Self {
      accepted: Vec::with_capacity(pending.len()),
      pending,
      merges: 0,
    }
  }

  /// 最多执行 `max_iterations` 次出队
  pub fn step(&mut self, max_iterations: usize) -> MergeProgress {
    for _ in 0..max_iterations {
      let Some(putative) = self.pending.pop_front() else {
        break;
      };

      match self.accepted.iter().position(|existing| existing.collides(&putative)) {
        Some(index) => {
          let existing = self.accepted.remove(index);
          self.pending.push_back(existing.average(&putative));
          self.merges += 1;
        }
        None => self.accepted.push(putative),
      }
    }

    if self.is_done() {
      MergeProgress::Done
    } else {
      MergeProgress::Pending
    }
  }

  pub fn is_done(&self) -> bool {
    self.pending.is_empty()
  }

  pub fn merges(&self) -> usize {
    self.merges
  }

  pub fn into_accepted(self) -> Vec<ClassifiedBox> {
    debug!("合并去重完成: 保留 {} 个, 合并 {} 次", self.accepted.len(), self.merges);
    self.accepted
  }
}

/// 一次性完成的合并去重
pub fn dedupe(
  detections: impl IntoIterator<Item = ClassifiedBox>,
  ignore: &BTreeSet<String>,
) -> Vec<ClassifiedBox> {
  let mut clustering = MergeClustering::new(detections, ignore);
  while clustering.step(MERGES_PER_TICK) == MergeProgress::Pending {}
  clustering.into_accepted()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn boxed(class_name: &str, cx: f32, cy: f32, w: f32, h: f32) -> ClassifiedBox {
    ClassifiedBox::new(cx, cy, w, h, 0, class_name)
  }

  /// 线性同余生成器，保证测试可复现
  struct Lcg(u64);

  impl Lcg {
    fn next_unit(&mut self) -> f32 {
      self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }

    fn detections(&mut self, count: usize) -> Vec<ClassifiedBox> {
      const CLASSES: [&str; 3] = ["face", "cup", "person"];
      (0..count)
        .map(|_| {
          let class_name = CLASSES[(self.next_unit() * 3.0) as usize % 3];
          boxed(
            class_name,
            self.next_unit() - 0.5,
            self.next_unit() - 0.5,
            self.next_unit() * 0.4,
            self.next_unit() * 0.4,
          )
        })
        .collect()
    }
  }

  #[test]
  fn overlapping_faces_merge_into_their_average() {
    let input = vec![boxed("face", 0.0, 0.0, 1.0, 1.0), boxed("face", 0.1, 0.1, 1.0, 1.0)];
    let output = dedupe(input, &BTreeSet::new());

    assert_eq!(output.len(), 1);
    assert_eq!(output[0].center_x(), 0.05);
    assert_eq!(output[0].center_y(), 0.05);
    assert_eq!(output[0].width(), 1.0);
    assert_eq!(output[0].height(), 1.0);
    assert_eq!(output[0].class_name(), "face");
  }

  #[test]
  fn different_classes_are_kept_apart() {
    let input = vec![boxed("face", 0.0, 0.0, 1.0, 1.0), boxed("cup", 0.1, 0.1, 1.0, 1.0)];
    let output = dedupe(input, &BTreeSet::new());
    assert_eq!(output.len(), 2);
  }

  #[test]
  fn merged_box_is_rechecked_against_accepted_boxes() {
    // a 与 c 相距较远，但 a 与 b 的平均值会落到 c 附近
    let a = boxed("face", -0.2, 0.0, 0.3, 0.3);
    let c = boxed("face", 0.1, 0.0, 0.3, 0.3);
    let b = boxed("face", 0.0, 0.0, 0.3, 0.3);
    assert!(!a.collides(&c));

    let mut clustering = MergeClustering::new(vec![a, c, b], &BTreeSet::new());
    assert_eq!(clustering.step(MERGES_PER_TICK), MergeProgress::Done);
    assert!(clustering.merges() >= 2);
    assert_eq!(clustering.into_accepted().len(), 1);
  }

  #[test]
  fn step_yields_after_the_iteration_limit() {
    let input: Vec<_> = (0..25).map(|i| boxed("face", i as f32 * 0.1, 0.0, 0.01, 0.01)).collect();
    let mut clustering = MergeClustering::new(input, &BTreeSet::new());

    assert_eq!(clustering.step(MERGES_PER_TICK), MergeProgress::Pending);
    assert_eq!(clustering.step(MERGES_PER_TICK), MergeProgress::Pending);
    assert_eq!(clustering.step(MERGES_PER_TICK), MergeProgress::Done);
    assert_eq!(clustering.into_accepted().len(), 25);
  }

  #[test]
  fn empty_input_is_done_immediately() {
    let mut clustering = MergeClustering::new(Vec::new(), &BTreeSet::new());
    assert_eq!(clustering.step(MERGES_PER_TICK), MergeProgress::Done);
    assert!(clustering.into_accepted().is_empty());
  }

  #[test]
  fn output_never_grows() {
    let mut rng = Lcg(7);
    for count in 0..60 {
      let input = rng.detections(count);
      let output = dedupe(input, &BTreeSet::new());
      assert!(output.len() <= count);
    }
  }

  #[test]
  fn dedupe_is_idempotent() {
    let mut rng = Lcg(42);
    for count in 0..60 {
      let once = dedupe(rng.detections(count), &BTreeSet::new());
      let twice = dedupe(once.clone(), &BTreeSet::new());
      assert_eq!(once, twice);
    }
  }

  #[test]
  fn ignored_classes_never_survive() {
    let ignore: BTreeSet<String> = ["person".to_string()].into_iter().collect();
    let mut rng = Lcg(1234);
    for count in 0..60 {
      let output = dedupe(rng.detections(count), &ignore);
      assert!(output.iter().all(|detection| detection.class_name() != "person"));
    }
  }
}
