// 该文件是 Tickscope 项目的一部分。
// src/config.rs - 流水线配置
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

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 默认每帧只执行一个工作单元
pub const DEFAULT_WORK_BUDGET: usize = 1;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 200;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("未知配置项: {0}")]
  UnknownKey(String),
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("配置项 {key} 超出范围 [0, 1]: {value}")]
  OutOfRange { key: String, value: f32 },
}

/// 检测流水线配置
///
/// `use_nms` 在两种后处理策略之间二选一：按分数排序的 IoU 抑制，
/// 或者按类别合并邻近框的聚类去重。`iou_threshold` 只在前者中使用。
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 每次 tick 最多执行的工作单元数，0 表示暂停
  pub work_budget_per_tick: usize,
  pub score_threshold: f32,
  pub iou_threshold: f32,
  pub ignore_classes: BTreeSet<String>,
  pub use_nms: bool,
  /// 解码阶段保留的最大检测数
  pub max_detections: usize,
  /// 框输出为空时不再回读标签输出
  pub skip_labels_when_boxes_empty: bool,
  /// 请求超过该时长仍未完成则强制复位；`None` 表示永不超时
  pub watchdog: Option<Duration>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      work_budget_per_tick: DEFAULT_WORK_BUDGET,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      ignore_classes: BTreeSet::new(),
      use_nms: false,
      max_detections: DEFAULT_MAX_DETECTIONS,
      skip_labels_when_boxes_empty: true,
      watchdog: None,
    }
  }
}

impl PipelineConfig {
  pub fn with_work_budget(mut self, budget: usize) -> Self {
    self.work_budget_per_tick = budget;
    self
  }

  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_ignored_class(mut self, class_name: impl Into<String>) -> Self {
    self.ignore_classes.insert(class_name.into());
    self
  }

  pub fn with_nms(mut self, use_nms: bool) -> Self {
    self.use_nms = use_nms;
    self
  }

  pub fn with_watchdog(mut self, watchdog: Option<Duration>) -> Self {
    self.watchdog = watchdog;
    self
  }

  pub fn is_ignored(&self, class_name: &str) -> bool {
    self.ignore_classes.contains(class_name)
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.trim().parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim() {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

fn parse_unit(key: &str, value: &str) -> Result<f32, ConfigError> {
  let v: f32 = parse_value(key, value)?;
  if !(0.0..=1.0).contains(&v) {
    return Err(ConfigError::OutOfRange {
      key: key.to_string(),
      value: v,
    });
  }
  Ok(v)
}

impl FromUrlWithScheme for PipelineConfig {
  const SCHEME: &'static str = "pipeline";
}

impl FromUrl for PipelineConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let mut config = PipelineConfig::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "budget" => config.work_budget_per_tick = parse_value(&key, &value)?,
        "score" => config.score_threshold = parse_unit(&key, &value)?,
        "iou" => config.iou_threshold = parse_unit(&key, &value)?,
        "ignore" => config.ignore_classes.extend(
          value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        ),
        "nms" => config.use_nms = parse_bool(&key, &value)?,
        "max" => config.max_detections = parse_value(&key, &value)?,
        "skip_empty" => config.skip_labels_when_boxes_empty = parse_bool(&key, &value)?,
        "watchdog" => {
          let seconds: f64 = parse_value(&key, &value)?;
          config.watchdog = Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
              key: key.to_string(),
              value: value.to_string(),
            })?;
        }
        other => return Err(ConfigError::UnknownKey(other.to_string())),
      }
    }

    debug!("流水线配置: {:?}", config);
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(url: &str) -> Result<PipelineConfig, ConfigError> {
    PipelineConfig::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn bare_url_gives_defaults() {
    assert_eq!(parse("pipeline://").unwrap(), PipelineConfig::default());
    assert_eq!(PipelineConfig::default().work_budget_per_tick, 1);
  }

  #[test]
  fn reads_every_option() {
    let config =
      parse("pipeline://?budget=4&score=0.3&iou=0.01&ignore=person,cup&ignore=dog&nms=true&max=50&skip_empty=false&watchdog=2.5")
        .unwrap();
    assert_eq!(config.work_budget_per_tick, 4);
    assert_eq!(config.score_threshold, 0.3);
    assert_eq!(config.iou_threshold, 0.01);
    assert!(config.is_ignored("person"));
    assert!(config.is_ignored("cup"));
    assert!(config.is_ignored("dog"));
    assert!(config.use_nms);
    assert_eq!(config.max_detections, 50);
    assert!(!config.skip_labels_when_boxes_empty);
    assert_eq!(config.watchdog, Some(Duration::from_millis(2500)));
  }

  #[test]
  fn zero_budget_is_allowed() {
    assert_eq!(parse("pipeline://?budget=0").unwrap().work_budget_per_tick, 0);
  }

  #[test]
  fn rejects_bad_input() {
    assert!(matches!(
      parse("pipeline://?speed=3"),
      Err(ConfigError::UnknownKey(_))
    ));
    assert!(matches!(
      parse("pipeline://?budget=-1"),
      Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
      parse("pipeline://?score=1.5"),
      Err(ConfigError::OutOfRange { .. })
    ));
    assert!(matches!(
      parse("pipeline://?watchdog=-3"),
      Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
      parse("detect://?budget=1"),
      Err(ConfigError::SchemeMismatch { .. })
    ));
  }
}
