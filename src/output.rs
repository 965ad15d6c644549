// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output.rs - 输出定义
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
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::StreamInfo, policy::Evaluation};

pub mod draw;

mod directory_record;
mod save_image_file;
mod save_video_file;
mod y4m;

pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};
pub use self::draw::{Draw, DrawError};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};
pub use self::save_video_file::{SaveVideoFileError, SaveVideoFileOutput};
pub use self::y4m::{Y4mOutputError, Y4mVideoOutput};

/// 持久化标注后的帧
///
/// 调用顺序：`begin` 一次，`render_frame` 每帧一次，`finish` 一次。
/// 运行中途出错时 `finish` 仍会被调用，此时写出的文件不保证完整。
pub trait Render {
  fn begin(&mut self, _info: &StreamInfo) -> Result<(), OutputError> {
    Ok(())
  }

  fn render_frame(&mut self, annotated: &RgbImage, evaluation: &Evaluation) -> Result<(), OutputError>;

  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}

impl<R: Render + ?Sized> Render for Box<R> {
  fn begin(&mut self, info: &StreamInfo) -> Result<(), OutputError> {
    (**self).begin(info)
  }

  fn render_frame(&mut self, annotated: &RgbImage, evaluation: &Evaluation) -> Result<(), OutputError> {
    (**self).render_frame(annotated, evaluation)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("保存视频文件错误: {0}")]
  SaveVideoFileError(#[from] SaveVideoFileError),
  #[error("Y4M 输出错误: {0}")]
  Y4mOutputError(#[from] Y4mOutputError),
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  SaveVideoFileOutput(SaveVideoFileOutput),
  Y4mVideoOutput(Y4mVideoOutput),
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFileOutput(
        SaveImageFileOutput::from_url(url)?,
      )),
      SaveVideoFileOutput::SCHEME => Ok(OutputWrapper::SaveVideoFileOutput(
        SaveVideoFileOutput::from_url(url)?,
      )),
      Y4mVideoOutput::SCHEME => Ok(OutputWrapper::Y4mVideoOutput(Y4mVideoOutput::from_url(url)?)),
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecordOutput(
        DirectoryRecordOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(format!("不支持的输出方案 '{}'", other))),
    }
  }
}

impl Render for OutputWrapper {
  fn begin(&mut self, info: &StreamInfo) -> Result<(), OutputError> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output.begin(info),
      OutputWrapper::SaveVideoFileOutput(output) => output.begin(info),
      OutputWrapper::Y4mVideoOutput(output) => output.begin(info),
      OutputWrapper::DirectoryRecordOutput(output) => output.begin(info),
    }
  }

  fn render_frame(&mut self, annotated: &RgbImage, evaluation: &Evaluation) -> Result<(), OutputError> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output.render_frame(annotated, evaluation),
      OutputWrapper::SaveVideoFileOutput(output) => output.render_frame(annotated, evaluation),
      OutputWrapper::Y4mVideoOutput(output) => output.render_frame(annotated, evaluation),
      OutputWrapper::DirectoryRecordOutput(output) => output.render_frame(annotated, evaluation),
    }
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output.finish(),
      OutputWrapper::SaveVideoFileOutput(output) => output.finish(),
      OutputWrapper::Y4mVideoOutput(output) => output.finish(),
      OutputWrapper::DirectoryRecordOutput(output) => output.finish(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatches_on_scheme() {
    let url = Url::parse("y4m:///tmp/out.y4m").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Y4mVideoOutput(_))
    ));

    let url = Url::parse("rtsp://host/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
