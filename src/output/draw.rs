// 该文件是 Tickscope 项目的一部分。
// src/output/draw.rs - 检测框绘制
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{model::ClassifiedBox, output::pixel_rect};

const PALETTE_SIZE: usize = 80;
const BORDER_THICKNESS: i32 = 2;

/// 按类别着色绘制检测框
pub struct Draw {
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 每个 COCO 类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn color_of(&self, detection: &ClassifiedBox) -> Rgb<u8> {
    let index = detection.class_index().rem_euclid(self.colors.len() as i32) as usize;
    self.colors[index]
  }

  pub fn draw_detections(&self, image: &mut RgbImage, items: &[ClassifiedBox]) {
    for detection in items {
      let Some((x_min, y_min, x_max, y_max)) = pixel_rect(image, detection.to_unit_corners()) else {
        continue;
      };
      let color = self.color_of(detection);

      // 边框加粗
      for thickness in 0..BORDER_THICKNESS {
        let width = (x_max - x_min + 1) as i32 - 2 * thickness;
        let height = (y_max - y_min + 1) as i32 - 2 * thickness;
        if width <= 0 || height <= 0 {
          break;
        }
        let rect = Rect::at(x_min as i32 + thickness, y_min as i32 + thickness).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, color);
      }
    }
  }
}
