// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/sequence.rs - 内存帧序列
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

use std::collections::VecDeque;

use image::RgbImage;

use crate::{
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
};

/// 已经在内存中的帧，常用于嵌入调用和测试
pub struct FrameSequence {
  frames: VecDeque<RgbImage>,
  info: StreamInfo,
  next_index: u64,
}

impl FrameSequence {
  /// 空序列的尺寸记为 0x0
  pub fn new(frames: Vec<RgbImage>, fps: Option<f64>) -> Self {
    let (width, height) = frames.first().map(RgbImage::dimensions).unwrap_or((0, 0));
    Self {
      frames: frames.into(),
      info: StreamInfo { width, height, fps },
      next_index: 0,
    }
  }
}

impl Iterator for FrameSequence {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let image = self.frames.pop_front()?;
    let index = self.next_index;
    self.next_index += 1;
    let timestamp_ms = (index as f64 * self.info.frame_interval_ms()) as u64;
    Some(Ok(Frame::new(image, index, timestamp_ms)))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.frames.len(), Some(self.frames.len()))
  }
}

impl FrameSource for FrameSequence {
  fn info(&self) -> StreamInfo {
    self.info
  }
}
