// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageReader, RgbImage};
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
};

/// 单张图片，只产生一帧
pub struct ImageFileInput {
  image: Option<RgbImage>,
  info: StreamInfo,
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .map_err(|e| InputError::unavailable(path.display(), e))?
      .with_guessed_format()
      .map_err(|e| InputError::unavailable(path.display(), e))?
      .decode()
      .map_err(|e| InputError::unavailable(path.display(), e))?
      .to_rgb8();

    debug!("读取图片 {}: {}x{}", path.display(), image.width(), image.height());
    Ok(Self::from_image(image))
  }

  pub fn from_image(image: RgbImage) -> Self {
    let info = StreamInfo {
      width: image.width(),
      height: image.height(),
      fps: None,
    };
    Self {
      image: Some(image),
      info,
    }
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", Self::SCHEME, url.scheme());
      return Err(InputError::scheme_mismatch(Self::SCHEME, url));
    }
    Self::open(url.path())
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Ok(Frame::new(image, 0, 0)))
  }
}

impl FrameSource for ImageFileInput {
  fn info(&self) -> StreamInfo {
    self.info
  }
}
