// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/frame_directory.rs - 图片目录作为视频输入
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

//! 按文件名排序的图片目录，逐张读取为视频帧。
//!
//! URL 格式：`frames:///path/to/dir?fps=10`

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
  query_value,
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

pub struct FrameDirectoryInput {
  pending: VecDeque<PathBuf>,
  info: StreamInfo,
  next_index: u64,
}

impl FrameDirectoryInput {
  pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self, InputError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| InputError::unavailable(dir.display(), e))?;

    let mut paths: Vec<PathBuf> = entries
      .filter_map(Result::ok)
      .map(|entry| entry.path())
      .filter(|path| is_image_file(path))
      .collect();
    paths.sort();

    let first = paths
      .first()
      .ok_or_else(|| InputError::unavailable(dir.display(), "目录中没有图片"))?;
    let (width, height) =
      image::image_dimensions(first).map_err(|e| InputError::unavailable(first.display(), e))?;

    info!("图片目录 {}: {} 帧, {}x{}", dir.display(), paths.len(), width, height);
    Ok(Self {
      pending: paths.into(),
      info: StreamInfo { width, height, fps },
      next_index: 0,
    })
  }
}

impl FromUrlWithScheme for FrameDirectoryInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for FrameDirectoryInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::scheme_mismatch(Self::SCHEME, url));
    }
    let fps = match query_value(url, "fps") {
      Some(v) => Some(
        v.parse::<f64>()
          .map_err(|e| InputError::unavailable(url, format!("无效的帧率 {}: {}", v, e)))?,
      ),
      None => None,
    };
    Self::open(url.path(), fps)
  }
}

impl Iterator for FrameDirectoryInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    let index = self.next_index;
    self.next_index += 1;

    let image = match image::open(&path) {
      Ok(image) => image.to_rgb8(),
      Err(e) => return Some(Err(InputError::Decode(format!("{}: {}", path.display(), e)))),
    };
    if image.dimensions() != (self.info.width, self.info.height) {
      return Some(Err(InputError::Decode(format!(
        "{} 的尺寸 {:?} 与首帧 {}x{} 不一致",
        path.display(),
        image.dimensions(),
        self.info.width,
        self.info.height
      ))));
    }

    let timestamp_ms = (index as f64 * self.info.frame_interval_ms()) as u64;
    Some(Ok(Frame::new(image, index, timestamp_ms)))
  }
}

impl FrameSource for FrameDirectoryInput {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;

  #[test]
  fn frames_follow_file_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
      RgbImage::from_pixel(4, 4, Rgb([value, 0, 0]))
        .save(dir.path().join(name))
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let input = FrameDirectoryInput::open(dir.path(), Some(10.0)).unwrap();
    let frames: Vec<Frame> = input.map(Result::unwrap).collect();

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].image.get_pixel(0, 0)[0], 10);
    assert_eq!(frames[2].image.get_pixel(0, 0)[0], 30);
    assert_eq!(frames[2].index, 2);
    assert_eq!(frames[2].timestamp_ms, 200);
  }

  #[test]
  fn empty_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      FrameDirectoryInput::open(dir.path(), None),
      Err(InputError::SourceUnavailable { .. })
    ));
  }
}
