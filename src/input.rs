// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input.rs - 视频/图像输入
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

//! 帧来源
//!
//! 所有来源都是只能向前读取一次的迭代器；重新处理同一输入需要重新打开。
//! 打开失败统一报告为 [`InputError::SourceUnavailable`]。

use std::fmt::Display;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamInfo},
};

mod ffmpeg_video;
mod frame_directory;
mod image_file;
mod interruptible;
mod sequence;

pub use self::ffmpeg_video::FfmpegVideoInput;
pub use self::frame_directory::FrameDirectoryInput;
pub use self::image_file::ImageFileInput;
pub use self::interruptible::Interruptible;
pub use self::sequence::FrameSequence;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("输入源不可用 {location}: {reason}")]
  SourceUnavailable { location: String, reason: String },
  #[error("帧解码失败: {0}")]
  Decode(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerInputError),
}

impl InputError {
  pub fn unavailable(location: impl Display, reason: impl Display) -> Self {
    Self::SourceUnavailable {
      location: location.to_string(),
      reason: reason.to_string(),
    }
  }

  fn scheme_mismatch(expected: &str, url: &Url) -> Self {
    Self::SchemeMismatch(format!("期望 '{}', 实际 '{}'", expected, url.scheme()))
  }
}

/// 有序、有限、只读一次的帧序列
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  fn info(&self) -> StreamInfo;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn info(&self) -> StreamInfo {
    (**self).info()
  }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
  fn info(&self) -> StreamInfo {
    (**self).info()
  }
}

pub enum InputWrapper {
  Image(ImageFileInput),
  Video(FfmpegVideoInput),
  Frames(FrameDirectoryInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

impl InputWrapper {
  /// 是否为单张图片
  pub fn is_still_image(&self) -> bool {
    matches!(self, InputWrapper::Image(_))
  }
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::Image(ImageFileInput::from_url(url)?)),
      FfmpegVideoInput::SCHEME => Ok(InputWrapper::Video(FfmpegVideoInput::from_url(url)?)),
      FrameDirectoryInput::SCHEME => Ok(InputWrapper::Frames(FrameDirectoryInput::from_url(url)?)),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInputPipelineBuilder::SCHEME => {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(InputWrapper::GStreamer(input))
      }
      other => Err(InputError::SchemeMismatch(format!("不支持的输入方案 '{}'", other))),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Image(input) => input.next(),
      InputWrapper::Video(input) => input.next(),
      InputWrapper::Frames(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn info(&self) -> StreamInfo {
    match self {
      InputWrapper::Image(input) => input.info(),
      InputWrapper::Video(input) => input.info(),
      InputWrapper::Frames(input) => input.info(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.info(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn missing_image_is_unavailable() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SourceUnavailable { .. })
    ));
  }
}
