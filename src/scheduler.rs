// 该文件是 Tickscope 项目的一部分。
// src/scheduler.rs - 按帧分片执行的推理调度器
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

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::{
  backend::{DeviceTensor, InferenceBackend, OutputSlot},
  config::PipelineConfig,
  input::TensorSource,
  model::{ClassifiedBox, DetectResult, OutputDecoder},
  postprocess::PostprocessJob,
  tensor::{Shape, Tensor},
};

/// 提交到回调的耗时超过该值时记录警告，不会中止请求
pub const SLOW_ROUND_TRIP: Duration = Duration::from_secs(10);

/// 对外可见的调度阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
  Idle,
  Scheduling { units_executed: usize },
  AwaitingReadback(OutputSlot),
  Finalizing,
}

enum Stage {
  Idle,
  Scheduling {
    units_executed: usize,
  },
  AwaitingReadback {
    slot: OutputSlot,
    handle: Box<dyn DeviceTensor>,
    outputs: Vec<Tensor>,
  },
  Finalizing(PostprocessJob),
}

struct Request<S> {
  source: S,
  started: Instant,
}

pub type ResultCallback<S> = Box<dyn FnMut(DetectResult<S>)>;

/// 单槽位的检测调度器
///
/// 由外部每帧调用一次 [`Scheduler::tick`] 推进。同一时刻最多只有一个请求，
/// 忙碌时的提交会被直接丢弃。每个被接受的请求都恰好触发一次回调，
/// 且回调只会在 `tick` 中发生。
pub struct Scheduler<B, D, S> {
  backend: B,
  decoder: D,
  tensor_source: Box<dyn TensorSource<S>>,
  input: Tensor,
  config: PipelineConfig,
  stage: Stage,
  request: Option<Request<S>>,
  callback: Option<ResultCallback<S>>,
}

impl<B, D, S> Scheduler<B, D, S>
where
  B: InferenceBackend,
  D: OutputDecoder,
{
  pub fn new(
    backend: B,
    decoder: D,
    tensor_source: Box<dyn TensorSource<S>>,
    input_shape: impl Into<Shape>,
    config: PipelineConfig,
  ) -> Self {
    let input = Tensor::zeros_f32(input_shape);
    debug!("创建调度器: 输入 {:?}, 配置 {:?}", input.shape().dims(), config);
    Self {
      backend,
      decoder,
      tensor_source,
      input,
      config,
      stage: Stage::Idle,
      request: None,
      callback: None,
    }
  }

  pub fn set_callback(&mut self, callback: impl FnMut(DetectResult<S>) + 'static) {
    self.callback = Some(Box::new(callback));
  }

  pub fn with_callback(mut self, callback: impl FnMut(DetectResult<S>) + 'static) -> Self {
    self.set_callback(callback);
    self
  }

  /// 0 表示暂停，正在执行的请求保持当前进度
  pub fn set_work_budget(&mut self, budget: usize) {
    debug!("工作预算: {} -> {}", self.config.work_budget_per_tick, budget);
    self.config.work_budget_per_tick = budget;
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn backend_mut(&mut self) -> &mut B {
    &mut self.backend
  }

  pub fn is_busy(&self) -> bool {
    self.request.is_some()
  }

  pub fn phase(&self) -> SchedulerPhase {
    match &self.stage {
      Stage::Idle => SchedulerPhase::Idle,
      Stage::Scheduling { units_executed } => SchedulerPhase::Scheduling {
        units_executed: *units_executed,
      },
      Stage::AwaitingReadback { slot, .. } => SchedulerPhase::AwaitingReadback(*slot),
      Stage::Finalizing(_) => SchedulerPhase::Finalizing,
    }
  }

  /// 提交一帧；调度器忙碌时返回 `false` 且不产生任何影响
  pub fn submit(&mut self, source: S) -> bool {
    self.submit_at(source, Instant::now())
  }

  pub fn submit_at(&mut self, source: S, now: Instant) -> bool {
    if self.is_busy() {
      trace!("调度器忙碌，丢弃本次提交");
      return false;
    }

    self.stage = match self.prepare(&source) {
      Ok(()) => Stage::Scheduling { units_executed: 0 },
      Err(message) => {
        error!("{}", message);
        Stage::Finalizing(PostprocessJob::finished(Vec::new()))
      }
    };
    self.request = Some(Request { source, started: now });
    debug!("接受检测请求");
    true
  }

  fn prepare(&mut self, source: &S) -> Result<(), String> {
    self
      .tensor_source
      .to_tensor(source, &mut self.input)
      .map_err(|e| format!("生成输入张量失败: {}", e))?;
    self
      .backend
      .schedule(&self.input)
      .map_err(|e| format!("提交前向计算失败: {}", e))
  }

  pub fn tick(&mut self) {
    self.tick_at(Instant::now())
  }

  pub fn tick_at(&mut self, now: Instant) {
    let Some(request) = &self.request else {
      return;
    };

    if let Some(limit) = self.config.watchdog {
      let elapsed = now.saturating_duration_since(request.started);
      if elapsed >= limit {
        warn!("请求 {:?} 未完成，看门狗强制复位", elapsed);
        // 丢弃输出句柄与中间结果
        self.stage = Stage::Idle;
        self.complete(now, Vec::new());
        return;
      }
    }

    let stage = std::mem::replace(&mut self.stage, Stage::Idle);
    self.stage = match stage {
      Stage::Idle => Stage::Idle,
      Stage::Scheduling { units_executed } => self.run_work_units(units_executed),
      Stage::AwaitingReadback {
        slot,
        handle,
        outputs,
      } => self.poll_readback(slot, handle, outputs),
      Stage::Finalizing(mut job) => match job.poll() {
        Some(items) => {
          self.complete(now, items);
          Stage::Idle
        }
        None => Stage::Finalizing(job),
      },
    };
  }

  fn run_work_units(&mut self, mut units_executed: usize) -> Stage {
    let budget = self.config.work_budget_per_tick;
    if budget == 0 {
      return Stage::Scheduling { units_executed };
    }

    let mut exhausted = false;
    for _ in 0..budget {
      if !self.backend.next_work_unit() {
        exhausted = true;
        break;
      }
      units_executed += 1;
    }
    trace!("已执行 {} 个工作单元", units_executed);

    if exhausted || self.backend.is_scheduled_complete() {
      debug!("前向计算完成，共 {} 个工作单元", units_executed);
      self.begin_readback(OutputSlot::Primary, Vec::new())
    } else {
      Stage::Scheduling { units_executed }
    }
  }

  fn begin_readback(&mut self, slot: OutputSlot, outputs: Vec<Tensor>) -> Stage {
    match self.backend.peek_output(slot) {
      Some(mut handle) => {
        handle.request_readback();
        Stage::AwaitingReadback {
          slot,
          handle,
          outputs,
        }
      }
      None => {
        debug!("输出 {} 没有数据，视为没有检测结果", slot.index());
        Stage::Finalizing(PostprocessJob::finished(Vec::new()))
      }
    }
  }

  fn poll_readback(&mut self, slot: OutputSlot, handle: Box<dyn DeviceTensor>, mut outputs: Vec<Tensor>) -> Stage {
    if !handle.is_readback_done() {
      return Stage::AwaitingReadback {
        slot,
        handle,
        outputs,
      };
    }

    let tensor = handle.readback_and_clone();
    drop(handle);
    trace!("输出 {} 回读完成: {:?}", slot.index(), tensor.shape().dims());

    match slot {
      OutputSlot::Primary => {
        if tensor.shape().is_empty() && self.config.skip_labels_when_boxes_empty {
          debug!("输出 0 为空，跳过输出 1 的回读");
          return Stage::Finalizing(PostprocessJob::finished(Vec::new()));
        }
        outputs.push(tensor);
        self.begin_readback(OutputSlot::Secondary, outputs)
      }
      OutputSlot::Secondary => {
        outputs.push(tensor);
        let candidates = match outputs.as_slice() {
          [primary, secondary] => self.decoder.decode(primary, secondary, &self.config),
          _ => {
            error!("输出数量异常: {}", outputs.len());
            Vec::new()
          }
        };
        Stage::Finalizing(PostprocessJob::new(candidates, &self.config))
      }
    }
  }

  fn complete(&mut self, now: Instant, mut items: Vec<ClassifiedBox>) {
    let Some(request) = self.request.take() else {
      return;
    };

    if let Some(max_results) = self.decoder.max_results() {
      items.truncate(max_results);
    }

    let elapsed = now.saturating_duration_since(request.started);
    if elapsed > SLOW_ROUND_TRIP {
      warn!("检测耗时过长: {:?}", elapsed);
    }
    info!("检测完成: {} 个目标, 耗时 {:?}", items.len(), elapsed);

    let result = DetectResult {
      source: request.source,
      items: items.into_boxed_slice(),
    };
    match self.callback.as_mut() {
      Some(callback) => callback(result),
      None => debug!("未设置回调，丢弃检测结果"),
    }
  }
}
