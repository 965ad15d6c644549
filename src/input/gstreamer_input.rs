// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 使用 GStreamer 解码视频文件，保持原始分辨率，输出 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! - `gst://file/path/to/video.mp4`
//! - `gst://file/path/to/video.mp4?rotate=90`
//!
//! appsink 不丢帧，分析速度慢于解码速度时由管道反压。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum PipelineItem {
  FileSource(String),
  VideoFlip { method: u32 },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location=\"{}\" ! decodebin", path),
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  location: String,
  items: Vec<PipelineItem>,
}

impl GStreamerInputPipelineBuilder {
  fn video_flip(rotate: Option<&str>) -> Option<PipelineItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(PipelineItem::VideoFlip { method })
  }

  pub fn build(self) -> Result<GStreamerInput, InputError> {
    gst::init().map_err(GStreamerInputError::from)?;

    let description = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let description = format!("{} ! appsink name=sink sync=false max-buffers=4", description);
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(GStreamerInputError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    pipeline
      .set_state(gst::State::Playing)
      .map_err(GStreamerInputError::from)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      pending: None,
      info: StreamInfo {
        width: 0,
        height: 0,
        fps: None,
      },
      next_index: 0,
    };

    // 读到第一帧才能确定分辨率；读不到说明文件无法解码
    let first = input
      .appsink
      .pull_sample()
      .map_err(|e| InputError::unavailable(&self.location, e))?;
    input.info = stream_info(&first).map_err(|e| InputError::unavailable(&self.location, e))?;
    input.pending = Some(first);
    Ok(input)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    if url.host_str() != Some("file") {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let mut items = vec![PipelineItem::FileSource(url.path().to_string())];
    if let Some(flip) = Self::video_flip(query.get("rotate").map(String::as_str)) {
      items.push(flip);
    }
    items.push(PipelineItem::TargetFormat);

    Ok(Self {
      location: url.path().to_string(),
      items,
    })
  }
}

fn stream_info(sample: &gst::Sample) -> Result<StreamInfo, GStreamerInputError> {
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let fps = video_info.fps();
  let fps = (fps.denom() > 0 && fps.numer() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);

  Ok(StreamInfo {
    width: video_info.width(),
    height: video_info.height(),
    fps,
  })
}

/// 按行复制，去掉每行末尾的对齐填充
fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + width * 3]);
  }
  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  pending: Option<gst::Sample>,
  info: StreamInfo,
  next_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull(&mut self) -> Option<Result<gst::Sample, GStreamerInputError>> {
    if let Some(sample) = self.pending.take() {
      return Some(Ok(sample));
    }
    match self.appsink.pull_sample() {
      Ok(sample) => Some(Ok(sample)),
      Err(_) if self.appsink.is_eos() => None,
      Err(e) => Some(Err(e.into())),
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = match self.pull()? {
      Ok(sample) => sample,
      Err(e) => return Some(Err(e.into())),
    };

    let index = self.next_index;
    self.next_index += 1;

    let timestamp_ms = sample
      .buffer()
      .and_then(|b| b.pts())
      .map(|pts| pts.mseconds())
      .unwrap_or_else(|| (index as f64 * self.info.frame_interval_ms()) as u64);

    Some(
      sample_to_image(&sample)
        .map(|image| Frame::new(image, index, timestamp_ms))
        .map_err(InputError::from),
    )
  }
}

impl FrameSource for GStreamerInput {
  fn info(&self) -> StreamInfo {
    self.info
  }
}
