// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/interruptible.rs - 可由调用方提前结束的输入
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::{
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
};

/// 停止标志置位后不再产生新帧，并立即释放内部输入源
///
/// 配合 `ctrlc` 使用时，把同一个标志交给信号处理函数即可。
pub struct Interruptible<S> {
  inner: Option<S>,
  info: StreamInfo,
  stop: Arc<AtomicBool>,
  limit: Option<u64>,
  yielded: u64,
}

impl<S: FrameSource> Interruptible<S> {
  pub fn new(inner: S, stop: Arc<AtomicBool>) -> Self {
    let info = inner.info();
    Self {
      inner: Some(inner),
      info,
      stop,
      limit: None,
      yielded: 0,
    }
  }

  /// 最多读取 `limit` 帧
  pub fn with_limit(mut self, limit: Option<u64>) -> Self {
    self.limit = limit;
    self
  }

  pub fn stop_handle(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  fn close(&mut self, why: &str) {
    if self.inner.take().is_some() {
      info!("输入提前结束: {}, 已读取 {} 帧", why, self.yielded);
    }
  }
}

impl<S: FrameSource> Iterator for Interruptible<S> {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.stop.load(Ordering::SeqCst) {
      self.close("收到停止信号");
      return None;
    }
    if self.limit.is_some_and(|limit| self.yielded >= limit) {
      self.close("达到帧数上限");
      return None;
    }

    let item = self.inner.as_mut()?.next();
    match item {
      Some(item) => {
        self.yielded += 1;
        Some(item)
      }
      None => {
        self.inner = None;
        None
      }
    }
  }
}

impl<S: FrameSource> FrameSource for Interruptible<S> {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::input::FrameSequence;

  fn five_frames() -> FrameSequence {
    FrameSequence::new(vec![RgbImage::new(2, 2); 5], None)
  }

  #[test]
  fn stop_flag_ends_stream() {
    let stop = Arc::new(AtomicBool::new(false));
    let mut input = Interruptible::new(five_frames(), stop.clone());

    assert!(input.next().is_some());
    assert!(input.next().is_some());
    stop.store(true, Ordering::SeqCst);
    assert!(input.next().is_none());
    assert!(input.inner.is_none());

    stop.store(false, Ordering::SeqCst);
    assert!(input.next().is_none());
  }

  #[test]
  fn limit_caps_frame_count() {
    let input = Interruptible::new(five_frames(), Arc::new(AtomicBool::new(false))).with_limit(Some(3));
    assert_eq!(input.count(), 3);
  }
}
