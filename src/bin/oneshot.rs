// 该文件是 Tickscope 项目的一部分。
// src/bin/oneshot.rs - 单张图像检测
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

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use image::RgbImage;
use tracing::{info, warn};
use url::Url;

use tickscope::{
  FromUrl,
  backend::ReplayBackend,
  config::PipelineConfig,
  input::{ImageFileInput, ImageTensorSource, TensorSource},
  model::{
    DetectResult, FACE_INPUT_SIZE, FaceDetectorDecoder, LabelTable, ObjectClassifierDecoder,
    OutputDecoder, PriorTable,
  },
  output::{OutputWrapper, Render},
  scheduler::Scheduler,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModelKind {
  /// 通用物体分类器（设备端 NMS）
  Classifier,
  /// 基于先验框的人脸检测器
  Face,
}

/// Tickscope 单张图像检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 设备输出抓取文件，例如 replay:///path/capture.json
  #[arg(long, value_name = "REPLAY")]
  replay: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  output: Url,
  /// 流水线配置
  #[arg(long, value_name = "PIPELINE", default_value = "pipeline://")]
  pipeline: Url,
  #[arg(long, value_enum, default_value = "classifier")]
  model: ModelKind,
  /// 类别名称文件，每行一个；缺省为 COCO 80 类
  #[arg(long, value_name = "LABELS")]
  labels: Option<PathBuf>,
  /// 最多模拟的帧数
  #[arg(long, default_value_t = 100_000)]
  max_ticks: u64,
}

fn run<D: OutputDecoder>(
  backend: ReplayBackend,
  decoder: D,
  source: ImageTensorSource,
  config: PipelineConfig,
  image: Arc<RgbImage>,
  max_ticks: u64,
) -> Result<DetectResult<Arc<RgbImage>>> {
  let input_shape = source.input_shape();
  if backend.input_shape().dims() != &input_shape[..] {
    warn!(
      "抓取文件的输入形状 {:?} 与模型输入 {:?} 不一致",
      backend.input_shape().dims(),
      input_shape
    );
  }

  let slot: Rc<RefCell<Option<DetectResult<Arc<RgbImage>>>>> = Rc::default();
  let sink = slot.clone();
  let source: Box<dyn TensorSource<Arc<RgbImage>>> = Box::new(source);
  let mut scheduler = Scheduler::new(backend, decoder, source, input_shape, config)
    .with_callback(move |result| {
      sink.borrow_mut().replace(result);
    });

  if !scheduler.submit(image) {
    bail!("调度器拒绝了提交");
  }

  let mut ticks = 0;
  while slot.borrow().is_none() {
    if ticks >= max_ticks {
      bail!("{} 帧之后仍未得到结果", max_ticks);
    }
    scheduler.tick();
    ticks += 1;
  }
  info!("第 {} 帧得到结果", ticks);

  slot.borrow_mut().take().context("检测结果丢失")
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("回放文件: {}", args.replay);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("模型: {:?}", args.model);

  let config = PipelineConfig::from_url(&args.pipeline)?;
  let backend = ReplayBackend::from_url(&args.replay)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let image = ImageFileInput::from_url(&args.input)?
    .next()
    .context("输入中没有图像")?;
  let image = Arc::new(image);

  let now = std::time::Instant::now();
  let result = match args.model {
    ModelKind::Classifier => {
      let labels = match &args.labels {
        Some(path) => LabelTable::from_lines(
          &std::fs::read_to_string(path).with_context(|| format!("无法读取类别文件: {}", path.display()))?,
        ),
        None => LabelTable::coco(),
      };
      let decoder = ObjectClassifierDecoder::new(Arc::new(labels));
      run(backend, decoder, ImageTensorSource::classifier(), config, image, args.max_ticks)?
    }
    ModelKind::Face => {
      let priors = Arc::new(PriorTable::new(FACE_INPUT_SIZE));
      let decoder = FaceDetectorDecoder::new(priors);
      run(backend, decoder, ImageTensorSource::face(), config, image, args.max_ticks)?
    }
  };
  info!("检测完成，耗时: {:.2?}", now.elapsed());

  for item in result.items.iter() {
    info!(
      "{} ({}): 中心 ({:.3}, {:.3}), 尺寸 {:.3}x{:.3}",
      item.class_name(),
      item.class_index(),
      item.center_x(),
      item.center_y(),
      item.width(),
      item.height()
    );
  }

  let frame: &RgbImage = &result.source;
  output.render_result(frame, &result.items[..])?;

  Ok(())
}
