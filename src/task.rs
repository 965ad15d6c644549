// 该文件是 Shaowang （哨望） 项目的一部分。
// src/task.rs - 帧分析流水线
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

//! 帧分析流水线
//!
//! 每次运行在调用线程上逐帧同步执行：读帧、检测、策略评估、标注、统计、写出。
//! 第 N 帧检测完成之前不会读取第 N+1 帧。
//!
//! 模型不可重入时，用 [`ExclusiveModel`](crate::model::ExclusiveModel) 包装，
//! 在运行开始前取得锁，把守卫的引用交给 [`Pipeline`]，运行结束后再释放。

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use crate::summary::RunMode;
use crate::{
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
  model::{Model, ModelError},
  output::{Draw, OutputError, Render},
  policy::{Evaluation, FrameStamp, Policy},
  summary::{Aggregator, DEFAULT_MAX_LOGGED_EVENTS, RunSummary},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入错误: {0}")]
  SourceUnavailable(#[from] InputError),
  #[error("第 {frame_index} 帧检测失败: {source}")]
  DetectionCapability {
    frame_index: u64,
    #[source]
    source: ModelError,
  },
  #[error("输出写入失败: {0}")]
  OutputWrite(#[from] OutputError),
}

/// 单帧检测失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  /// 立即终止运行
  #[default]
  Abort,
  /// 跳过该帧并计数
  SkipAndCount,
  /// 最多连续跳过 n 帧，第 n+1 次连续失败时终止
  SkipConsecutive(u32),
}

impl FailurePolicy {
  fn tolerates(&self, consecutive: u32) -> bool {
    match self {
      FailurePolicy::Abort => false,
      FailurePolicy::SkipAndCount => true,
      FailurePolicy::SkipConsecutive(limit) => consecutive <= *limit,
    }
  }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
  pub max_logged_events: usize,
  pub failure_policy: FailurePolicy,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      max_logged_events: DEFAULT_MAX_LOGGED_EVENTS,
      failure_policy: FailurePolicy::Abort,
    }
  }
}

pub struct Pipeline<M, P> {
  model: M,
  policy: P,
  draw: Draw,
  options: RunOptions,
}

impl<M: Model, P: Policy> Pipeline<M, P> {
  pub fn new(model: M, policy: P) -> Self {
    Self {
      model,
      policy,
      draw: Draw::default(),
      options: RunOptions::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_options(mut self, options: RunOptions) -> Self {
    self.options = options;
    self
  }

  pub fn options(&self) -> &RunOptions {
    &self.options
  }

  /// 按调用方指定的模式运行
  pub fn run<S: FrameSource>(
    &self,
    mode: RunMode,
    source: S,
    output: Option<&mut dyn Render>,
  ) -> Result<RunSummary, PipelineError> {
    match mode {
      RunMode::Image => self.run_image(source, output),
      RunMode::Video => self.run_video(source, output),
    }
  }

  /// 单张图片；读不到帧视为输入不可用，检测失败总是终止
  pub fn run_image<S: FrameSource>(
    &self,
    mut source: S,
    output: Option<&mut dyn Render>,
  ) -> Result<RunSummary, PipelineError> {
    let info = source.info();
    info!("开始图片分析: {}x{}", info.width, info.height);

    let frame = match source.next() {
      Some(frame) => frame?,
      None => return Err(InputError::unavailable("image", "没有可读取的帧").into()),
    };
    drop(source);

    self.drive(&info, output, |output| {
      let mut aggregator = Aggregator::new(RunMode::Image, self.options.max_logged_events);
      let (evaluation, annotated) = self.analyze(&frame).map_err(|source| {
        error!("图片检测失败: {}", source);
        PipelineError::DetectionCapability {
          frame_index: frame.index,
          source,
        }
      })?;
      aggregator.record(frame.index, &evaluation);
      if let Some(out) = output.as_mut() {
        out.render_frame(&annotated, &evaluation)?;
      }
      Ok(aggregator.finish())
    })
  }

  /// 逐帧处理直到输入结束
  pub fn run_video<S: FrameSource>(
    &self,
    source: S,
    output: Option<&mut dyn Render>,
  ) -> Result<RunSummary, PipelineError> {
    let info = source.info();
    info!(
      "开始视频分析: {}x{} @ {:.2} fps, 失败策略 {:?}",
      info.width,
      info.height,
      info.fps_or_default(),
      self.options.failure_policy
    );

    self.drive(&info, output, |output| {
      let mut aggregator = Aggregator::new(RunMode::Video, self.options.max_logged_events);
      let mut consecutive_failures = 0u32;
      let started = std::time::Instant::now();

      for item in source {
        let frame = item?;
        match self.analyze(&frame) {
          Ok((evaluation, annotated)) => {
            consecutive_failures = 0;
            aggregator.record(frame.index, &evaluation);
            if let Some(out) = output.as_mut() {
              out.render_frame(&annotated, &evaluation)?;
            }
          }
          Err(source) => {
            consecutive_failures += 1;
            if !self.options.failure_policy.tolerates(consecutive_failures) {
              error!(
                "第 {} 帧检测失败 (连续 {} 次), 终止运行: {}",
                frame.index, consecutive_failures, source
              );
              return Err(PipelineError::DetectionCapability {
                frame_index: frame.index,
                source,
              });
            }
            warn!("第 {} 帧检测失败, 跳过: {}", frame.index, source);
            aggregator.record_failure();
            if let Some(out) = output.as_mut() {
              out.render_frame(&frame.image, &Evaluation::default())?;
            }
          }
        }
      }

      let summary = aggregator.finish();
      info!(
        "视频分析完成: {} 帧, {} 帧失败, {} 个检测, {} 个告警, 耗时 {:.2?}",
        summary.frames_processed,
        summary.frames_failed,
        summary.detections_total,
        summary.alert_total,
        started.elapsed()
      );
      Ok(summary)
    })
  }

  fn analyze(&self, frame: &Frame) -> Result<(Evaluation, RgbImage), ModelError> {
    let detections = self.model.detect(frame)?;
    let evaluation = self.policy.evaluate(detections, &FrameStamp::now(frame.index, frame.timestamp_ms));
    debug!(
      "第 {} 帧: {} 个检测, {} 个事件",
      frame.index,
      evaluation.detections.len(),
      evaluation.events.len()
    );
    let overlay = self.policy.overlay();
    let annotated = self.draw.annotate(&frame.image, &evaluation, overlay.as_ref());
    Ok((evaluation, annotated))
  }

  /// 输出的 `begin`/`finish` 包在运行前后；出错时仍会尝试 `finish`，其错误只记日志
  fn drive<F>(
    &self,
    info: &StreamInfo,
    mut output: Option<&mut dyn Render>,
    body: F,
  ) -> Result<RunSummary, PipelineError>
  where
    F: FnOnce(&mut Option<&mut dyn Render>) -> Result<RunSummary, PipelineError>,
  {
    let begun = match output.as_mut() {
      Some(out) => out.begin(info).map_err(PipelineError::from),
      None => Ok(()),
    };
    let result = begun.and_then(|()| body(&mut output));

    let Some(out) = output else {
      return result;
    };
    match result {
      Ok(summary) => {
        out.finish()?;
        Ok(summary)
      }
      Err(e) => {
        if let Err(finish_error) = out.finish() {
          warn!("运行失败后关闭输出时出错: {}", finish_error);
        }
        Err(e)
      }
    }
  }
}
