// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/y4m.rs - YUV4MPEG2 视频输出
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

//! 不依赖外部编码器的视频输出，写出 4:2:0 的 YUV4MPEG2 文件，
//! 可以直接用 ffplay/mpv 播放，或交给 ffmpeg 再编码。
//!
//! URL 格式：`y4m:///path/to/output.y4m?fps=25`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{DEFAULT_FPS, StreamInfo},
  output::{OutputError, Render},
  policy::Evaluation,
  query_value,
};

#[derive(Error, Debug)]
pub enum Y4mOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

struct Y4mWriter {
  out: BufWriter<File>,
  width: u32,
  height: u32,
}

pub struct Y4mVideoOutput {
  path: PathBuf,
  fps: Option<f64>,
  stream_fps: Option<f64>,
  writer: Option<Y4mWriter>,
  frames_written: u64,
}

impl Y4mVideoOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      fps: None,
      stream_fps: None,
      writer: None,
      frames_written: 0,
    }
  }

  pub fn frames_written(&self) -> u64 {
    self.frames_written
  }

  fn open(&self, width: u32, height: u32) -> Result<Y4mWriter, Y4mOutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let fps = self.fps.or(self.stream_fps).unwrap_or(DEFAULT_FPS);
    let (num, den) = fps_ratio(fps);
    let mut out = BufWriter::new(File::create(&self.path)?);
    writeln!(out, "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C420jpeg", width, height, num, den)?;

    info!(
      "写入 Y4M 视频: {}x{} @ {}:{} -> {}",
      width,
      height,
      num,
      den,
      self.path.display()
    );
    Ok(Y4mWriter { out, width, height })
  }
}

/// 帧率转为约分后的分数，保留三位小数精度
fn fps_ratio(fps: f64) -> (u64, u64) {
  let num = (fps * 1000.0).round().max(1.0) as u64;
  let den = 1000;
  let g = gcd(num, den);
  (num / g, den / g)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
  while b != 0 {
    (a, b) = (b, a % b);
  }
  a
}

/// 全范围 BT.601 转换，色度取 2x2 块平均
fn rgb_to_yuv420(image: &RgbImage) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
  let (w, h) = image.dimensions();
  let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

  let mut y_plane = Vec::with_capacity((w * h) as usize);
  for p in image.pixels() {
    let [r, g, b] = p.0.map(f32::from);
    y_plane.push((0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8);
  }

  let mut u_plane = Vec::with_capacity((cw * ch) as usize);
  let mut v_plane = Vec::with_capacity((cw * ch) as usize);
  for cy in 0..ch {
    for cx in 0..cw {
      let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
      for y in (cy * 2)..(cy * 2 + 2).min(h) {
        for x in (cx * 2)..(cx * 2 + 2).min(w) {
          let p = image.get_pixel(x, y);
          r += f32::from(p[0]);
          g += f32::from(p[1]);
          b += f32::from(p[2]);
          n += 1.0;
        }
      }
      let (r, g, b) = (r / n, g / n, b / n);
      let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
      let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
      u_plane.push(u.round().clamp(0.0, 255.0) as u8);
      v_plane.push(v.round().clamp(0.0, 255.0) as u8);
    }
  }
  (y_plane, u_plane, v_plane)
}

impl FromUrlWithScheme for Y4mVideoOutput {
  const SCHEME: &'static str = "y4m";
}

impl FromUrl for Y4mVideoOutput {
  type Error = Y4mOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(Y4mOutputError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut output = Self::new(uri.path());
    if let Some(fps) = query_value(uri, "fps") {
      let value = fps
        .parse::<f64>()
        .map_err(|e| Y4mOutputError::ValidationError(format!("无效的帧率 {}: {}", fps, e)))?;
      if !(value.is_finite() && value > 0.0) {
        return Err(Y4mOutputError::ValidationError(format!("无效的帧率 {}", fps)));
      }
      output.fps = Some(value);
    }
    Ok(output)
  }
}

impl Render for Y4mVideoOutput {
  fn begin(&mut self, info: &StreamInfo) -> Result<(), OutputError> {
    self.stream_fps = Some(info.fps_or_default());
    Ok(())
  }

  fn render_frame(&mut self, annotated: &RgbImage, _evaluation: &Evaluation) -> Result<(), OutputError> {
    if self.writer.is_none() {
      self.writer = Some(self.open(annotated.width(), annotated.height())?);
    }
    let Some(writer) = self.writer.as_mut() else {
      return Ok(());
    };

    if annotated.dimensions() != (writer.width, writer.height) {
      return Err(
        Y4mOutputError::ValidationError(format!(
          "帧尺寸 {:?} 与视频尺寸 {}x{} 不一致",
          annotated.dimensions(),
          writer.width,
          writer.height
        ))
        .into(),
      );
    }

    let (y, u, v) = rgb_to_yuv420(annotated);
    let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
      out.write_all(b"FRAME\n")?;
      out.write_all(&y)?;
      out.write_all(&u)?;
      out.write_all(&v)
    };
    write(&mut writer.out).map_err(Y4mOutputError::from)?;
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if let Some(mut writer) = self.writer.take() {
      writer.out.flush().map_err(Y4mOutputError::from)?;
      info!("Y4M 视频已保存: {} ({} 帧)", self.path.display(), self.frames_written);
    }
    Ok(())
  }
}
