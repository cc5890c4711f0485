// 该文件是 Tickscope 项目的一部分。
// src/postprocess.rs - 检测后处理
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

use tracing::debug;

use crate::{
  config::PipelineConfig,
  model::{Candidate, ClassifiedBox},
};

/// 合并聚类每次 tick 最多执行的出队次数
pub const MERGES_PER_TICK: usize = 10;

mod merge;
mod nms;

pub use self::merge::{MergeClustering, MergeProgress, dedupe};
pub use self::nms::{iou, non_max_suppression};

enum JobState {
  Merging(MergeClustering),
  Ready(Vec<ClassifiedBox>),
  Taken,
}

/// 一次请求的后处理，按 tick 逐步推进
///
/// 先按分数阈值过滤，然后依据配置选择 IoU 抑制（一次完成）
/// 或合并聚类（每次 `poll` 推进 [`MERGES_PER_TICK`] 步）。
pub struct PostprocessJob {
  state: JobState,
}

impl PostprocessJob {
  pub fn new(candidates: Vec<Candidate>, config: &PipelineConfig) -> Self {
    let total = candidates.len();
    let candidates: Vec<Candidate> = candidates
      .into_iter()
      .filter(|candidate| candidate.score >= config.score_threshold)
      .collect();
    debug!("分数过滤: {} -> {}", total, candidates.len());

    let state = if config.use_nms {
      let candidates: Vec<Candidate> = candidates
        .into_iter()
        .filter(|candidate| !config.is_ignored(candidate.detection.class_name()))
        .collect();
      let kept = non_max_suppression(candidates, config.iou_threshold);
      JobState::Ready(kept.into_iter().map(|candidate| candidate.detection).collect())
    } else {
      JobState::Merging(MergeClustering::new(
        candidates.into_iter().map(|candidate| candidate.detection),
        &config.ignore_classes,
      ))
    };

    Self { state }
  }

  /// 已有最终结果，无需再处理
  pub fn finished(items: Vec<ClassifiedBox>) -> Self {
    Self {
      state: JobState::Ready(items),
    }
  }

  /// 推进一步；完成时返回结果，之后再调用返回 `None`
  pub fn poll(&mut self) -> Option<Vec<ClassifiedBox>> {
    if let JobState::Merging(clustering) = &mut self.state
      && clustering.step(MERGES_PER_TICK) == MergeProgress::Pending
    {
      return None;
    }

    match std::mem::replace(&mut self.state, JobState::Taken) {
      JobState::Merging(clustering) => Some(clustering.into_accepted()),
      JobState::Ready(items) => Some(items),
      JobState::Taken => None,
    }
  }
}
