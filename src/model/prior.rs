// 该文件是 Tickscope 项目的一部分。
// src/model/prior.rs - 先验框生成与回归解码
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

use tracing::{debug, warn};

use crate::tensor::{Shape, Tensor, TensorError};

/// 三个特征图尺度的步长
pub const PRIOR_STEPS: [usize; 3] = [8, 16, 32];
/// 每个尺度上成对的先验框边长（像素）
pub const PRIOR_MIN_SIZES: [[usize; 2]; 3] = [[16, 32], [64, 128], [256, 512]];
/// 中心与尺寸回归的方差
pub const LOC_VARIANCES: [f32; 2] = [0.1, 0.2];

/// 以参考图像尺寸归一化的先验框 `(cx, cy, w, h)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prior {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
}

/// 先验框表
///
/// 顺序固定为：尺度优先，其次按行，最后是同一格子内的各个边长。
/// 模型输出的每一行与这里的同一下标一一对应。
#[derive(Debug, Clone, PartialEq)]
pub struct PriorTable {
  priors: Box<[Prior]>,
}

impl PriorTable {
  /// 正方形输入，边长同时作为归一化参考尺寸
  pub fn new(image_size: usize) -> Self {
    Self::with_dimensions(image_size, image_size, image_size)
  }

  pub fn with_dimensions(image_width: usize, image_height: usize, reference_size: usize) -> Self {
    let reference = reference_size as f32;
    let mut priors = Vec::new();

    for (&step, min_sizes) in PRIOR_STEPS.iter().zip(PRIOR_MIN_SIZES.iter()) {
      let rows = image_height.div_ceil(step);
      let cols = image_width.div_ceil(step);
      for i in 0..rows {
        let cy = (i as f32 + 0.5) * step as f32;
        for j in 0..cols {
          let cx = (j as f32 + 0.5) * step as f32;
          for &min_size in min_sizes {
            let size = min_size as f32 / reference;
            priors.push(Prior {
              cx: cx / reference,
              cy: cy / reference,
              width: size,
              height: size,
            });
          }
        }
      }
    }

    debug!("生成先验框 {} 个", priors.len());
    Self {
      priors: priors.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.priors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.priors.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Prior> {
    self.priors.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Prior> {
    self.priors.iter()
  }
}

/// 中心点与尺寸形式的解码结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedBox {
  pub center: [f32; 2],
  pub size: [f32; 2],
}

impl DecodedBox {
  /// `[x1, y1, x2, y2]`
  pub fn corners(&self) -> [f32; 4] {
    let x1 = self.center[0] - self.size[0] / 2.0;
    let y1 = self.center[1] - self.size[1] / 2.0;
    [x1, y1, x1 + self.size[0], y1 + self.size[1]]
  }
}

/// 对单个先验框应用回归量 `(dx, dy, dw, dh)`，不做任何截断
pub fn decode_one(loc: [f32; 4], prior: &Prior) -> DecodedBox {
  let [dx, dy, dw, dh] = loc;
  let [v0, v1] = LOC_VARIANCES;
  DecodedBox {
    center: [
      prior.cx + dx * v0 * prior.width,
      prior.cy + dy * v0 * prior.height,
    ],
    size: [prior.width * (dw * v1).exp(), prior.height * (dh * v1).exp()],
  }
}

/// 将 `[N, 4]`（或 `[1, N, 4]`）回归输出解码为 `[N, 4]` 角点框
///
/// 行数与先验框数量不一致时只解码较少的那部分。
pub fn decode_boxes(loc: &Tensor, priors: &PriorTable) -> Result<Tensor, TensorError> {
  let data = loc.as_f32()?;
  let rows = data.len() / 4;
  if rows != priors.len() {
    warn!("回归输出行数 {} 与先验框数量 {} 不一致", rows, priors.len());
  }

  let count = rows.min(priors.len());
  let mut boxes = Vec::with_capacity(count * 4);
  for (row, prior) in data.chunks_exact(4).zip(priors.iter()) {
    let decoded = decode_one([row[0], row[1], row[2], row[3]], prior);
    boxes.extend_from_slice(&decoded.corners());
  }

  Tensor::from_f32(Shape::new([count, 4]), boxes)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_for_640_has_16800_priors() {
    let table = PriorTable::new(640);
    // (80*80 + 40*40 + 20*20) * 2
    assert_eq!(table.len(), 16800);
  }

  #[test]
  fn priors_are_scale_major_row_major_anchor_minor() {
    let table = PriorTable::new(640);
    let first = table.get(0).unwrap();
    let second = table.get(1).unwrap();
    let third = table.get(2).unwrap();

    assert_eq!(first.cx, 4.0 / 640.0);
    assert_eq!(first.cy, 4.0 / 640.0);
    assert_eq!(first.width, 16.0 / 640.0);
    assert_eq!(second.cx, first.cx);
    assert_eq!(second.width, 32.0 / 640.0);
    // 同一行的下一个格子
    assert_eq!(third.cx, 12.0 / 640.0);
    assert_eq!(third.cy, first.cy);

    // 第二个尺度的第一个先验框
    let coarse = table.get(80 * 80 * 2).unwrap();
    assert_eq!(coarse.cx, 8.0 / 640.0);
    assert_eq!(coarse.width, 64.0 / 640.0);
  }

  #[test]
  fn partial_cells_round_up() {
    // 100 / 8 = 12.5 -> 13 个格子
    let table = PriorTable::with_dimensions(100, 8, 100);
    let first_scale = 13 * 2;
    let second_scale = 7 * 2;
    let third_scale = 4 * 2;
    assert_eq!(table.len(), first_scale + second_scale + third_scale);
  }

  #[test]
  fn zero_regression_is_identity_on_the_prior() {
    let prior = Prior {
      cx: 0.5,
      cy: 0.5,
      width: 0.1,
      height: 0.1,
    };
    let decoded = decode_one([0.0, 0.0, 0.0, 0.0], &prior);
    assert_eq!(decoded.center, [0.5, 0.5]);
    assert_eq!(decoded.size, [0.1, 0.1]);

    let [x1, y1, x2, y2] = decoded.corners();
    assert!((x1 - 0.45).abs() < 1e-6);
    assert!((y1 - 0.45).abs() < 1e-6);
    assert!((x2 - 0.55).abs() < 1e-6);
    assert!((y2 - 0.55).abs() < 1e-6);
  }

  #[test]
  fn regression_shifts_and_scales() {
    let prior = Prior {
      cx: 0.5,
      cy: 0.25,
      width: 0.2,
      height: 0.4,
    };
    let decoded = decode_one([1.0, -1.0, 0.0, 5.0], &prior);
    assert!((decoded.center[0] - 0.52).abs() < 1e-6);
    assert!((decoded.center[1] - 0.21).abs() < 1e-6);
    assert_eq!(decoded.size[0], 0.2);
    assert!((decoded.size[1] - 0.4 * 1.0f32.exp()).abs() < 1e-6);
  }

  #[test]
  fn extreme_regression_is_not_clamped() {
    let prior = Prior {
      cx: 0.5,
      cy: 0.5,
      width: 0.5,
      height: 0.5,
    };
    let decoded = decode_one([0.0, 0.0, 20.0, 20.0], &prior);
    assert!(decoded.size[0] > 1.0);
    let [x1, _, x2, _] = decoded.corners();
    assert!(x1 < 0.0 && x2 > 1.0);
  }

  #[test]
  fn decoding_is_deterministic() {
    let table = PriorTable::new(64);
    let data: Vec<f32> = (0..table.len() * 4)
      .map(|i| ((i * 37 % 101) as f32 - 50.0) / 25.0)
      .collect();
    let loc = Tensor::from_f32([table.len(), 4], data).unwrap();

    let first = decode_boxes(&loc, &table).unwrap();
    let second = decode_boxes(&loc, &table).unwrap();
    let bits = |t: &Tensor| t.as_f32().unwrap().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first), bits(&second));
    assert_eq!(first.shape().dims(), &[table.len(), 4]);
  }

  #[test]
  fn decodes_only_the_shorter_of_loc_and_priors() {
    let table = PriorTable::new(64);
    let loc = Tensor::from_f32([1, 3, 4], vec![0.0; 12]).unwrap();
    let boxes = decode_boxes(&loc, &table).unwrap();
    assert_eq!(boxes.shape().dims(), &[3, 4]);
  }
}
