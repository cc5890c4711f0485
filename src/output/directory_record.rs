// 该文件是 Tickscope 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::ClassifiedBox,
  output::{Render, create_parent_dir},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  timestamp: String,
  width: u32,
  height: u32,
  items: &'a [ClassifiedBox],
}

/// 按日期分目录记录每一帧的检测结果
///
/// `folder://dir?image&always`：`image` 同时保存原图，`always` 在没有检测结果时也记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  save_image: bool,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let save_image = uri.query_pairs().any(|(k, _)| k == "image");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counter: Mutex::new(0),
      save_image,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  /// `dir/YYYY/MM/DD/HH-MM-SS-XXXX`，不含扩展名
  fn frame_stem(&self, now: &DateTime<Utc>) -> PathBuf {
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(format!("{}-{:04X}", now.format("%H-%M-%S"), self.frame_id()))
  }

  fn write_record(&self, stem: &Path, record: &FrameRecord) -> Result<(), DirectoryRecordOutputError> {
    let path = stem.with_extension("json");
    create_parent_dir(&path)?;
    std::fs::write(&path, serde_json::to_string_pretty(record)?)?;
    debug!("记录检测结果: {}", path.display());
    Ok(())
  }
}

impl Render<RgbImage, [ClassifiedBox]> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &[ClassifiedBox]) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let now = Utc::now();
    let stem = self.frame_stem(&now);
    let record = FrameRecord {
      timestamp: now.to_rfc3339(),
      width: frame.width(),
      height: frame.height(),
      items: result,
    };
    self.write_record(&stem, &record)?;

    if self.save_image {
      frame.save(stem.with_extension("png"))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = url::Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  #[test]
  fn writes_json_records_by_date() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "?image");

    let frame = RgbImage::new(8, 6);
    let items = [ClassifiedBox::new(0.1, -0.2, 0.3, 0.4, 41, "cup")];
    output.render_result(&frame, &items).unwrap();

    let files = files_under(dir.path());
    assert_eq!(files.len(), 2);
    let json = files.iter().find(|p| p.extension().is_some_and(|e| e == "json")).unwrap();
    assert!(json.file_name().unwrap().to_string_lossy().ends_with("-0001.json"));
    assert_eq!(json.strip_prefix(dir.path()).unwrap().components().count(), 4);

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["width"], 8);
    assert_eq!(value["height"], 6);
    assert_eq!(value["items"][0]["class_name"], "cup");
    assert_eq!(value["items"][0]["class_index"], 41);
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbImage::new(4, 4);

    output(dir.path(), "").render_result(&frame, &[]).unwrap();
    assert!(files_under(dir.path()).is_empty());

    output(dir.path(), "?always").render_result(&frame, &[]).unwrap();
    assert_eq!(files_under(dir.path()).len(), 1);
  }
}
