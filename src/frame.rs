// 该文件是 Shaowang （哨望） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::RgbImage;

/// 视频无帧率元数据时使用的默认帧率
pub const DEFAULT_FPS: f64 = 24.0;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（从 0 开始）
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 输入流的元数据，输出端据此保持与输入一致的分辨率与帧率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  /// 图片输入没有帧率
  pub fps: Option<f64>,
}

impl StreamInfo {
  pub fn fps_or_default(&self) -> f64 {
    match self.fps {
      Some(fps) if fps.is_finite() && fps > 0.0 => fps,
      _ => DEFAULT_FPS,
    }
  }

  /// 相邻两帧之间的时间间隔（毫秒）
  pub fn frame_interval_ms(&self) -> f64 {
    1000.0 / self.fps_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_or_broken_fps_falls_back() {
    let info = StreamInfo {
      width: 4,
      height: 4,
      fps: None,
    };
    assert_eq!(info.fps_or_default(), DEFAULT_FPS);

    let info = StreamInfo {
      fps: Some(0.0),
      ..info
    };
    assert_eq!(info.fps_or_default(), DEFAULT_FPS);

    let info = StreamInfo {
      fps: Some(25.0),
      ..info
    };
    assert_eq!(info.frame_interval_ms(), 40.0);
  }
}
