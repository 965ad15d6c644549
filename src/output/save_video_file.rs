// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 标注后的帧以 RGB24 原始数据写入 ffmpeg 的标准输入，由 ffmpeg 编码。
//! 分辨率与帧率默认沿用输入视频。yuv420p 要求宽高为偶数，
//! 奇数边会在右侧或底部补一行黑边，并记录一条警告。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.mp4` - 帧率沿用输入
//! - `video:///path/to/output.mp4?fps=30&codec=libx264` - 指定帧率和编码器
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{DEFAULT_FPS, StreamInfo},
  output::{OutputError, Render},
  policy::Evaluation,
  query_value,
};

#[derive(Error, Debug)]
pub enum SaveVideoFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

const DEFAULT_CODEC: &str = "libx264";
const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 120.0;

/// yuv420p 可编码的尺寸，奇数边向上补齐到偶数
fn padded_size(width: u32, height: u32) -> (u32, u32) {
  (width + width % 2, height + height % 2)
}

/// 在后台线程中持续读空子进程的标准错误，避免管道写满后子进程阻塞
fn drain_stderr(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
  thread::spawn(move || {
    let mut buffer = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buffer) {
      warn!("读取 ffmpeg 错误输出失败: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
  })
}

/// ffmpeg 编码进程
struct Encoder {
  child: Child,
  stdin: Option<ChildStdin>,
  stderr: Option<JoinHandle<String>>,
  width: u32,
  height: u32,
}

impl Encoder {
  fn spawn(path: &Path, width: u32, height: u32, fps: f64, codec: &str) -> Result<Self, SaveVideoFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!(
      "开始编码视频: {}x{} @ {} fps ({}) -> {}",
      width,
      height,
      fps,
      codec,
      path.display()
    );

    let mut command = Command::new("ffmpeg");
    command
      .args(["-y", "-loglevel", "error"])
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
      .args(["-s", &format!("{}x{}", width, height)])
      .args(["-r", &fps.to_string()])
      .args(["-i", "-"]);
    let padded = padded_size(width, height);
    if padded != (width, height) {
      warn!(
        "帧尺寸 {}x{} 不是偶数, 输出视频补边为 {}x{}",
        width, height, padded.0, padded.1
      );
      command.args(["-vf", &format!("pad={}:{}", padded.0, padded.1)]);
    }
    command
      .args(["-c:v", codec, "-pix_fmt", "yuv420p"])
      .arg(path);

    Self::start(command, width, height)
  }

  /// 启动已经配好参数的编码命令，标准输入接收原始帧
  fn start(mut command: Command, width: u32, height: u32) -> Result<Self, SaveVideoFileError> {
    let mut child = command
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| SaveVideoFileError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let stdin = child.stdin.take();
    let stderr = child.stderr.take().map(drain_stderr);
    Ok(Self {
      child,
      stdin,
      stderr,
      width,
      height,
    })
  }

  fn write(&mut self, image: &RgbImage) -> Result<(), SaveVideoFileError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(SaveVideoFileError::ValidationError(format!(
        "帧尺寸 {:?} 与视频尺寸 {}x{} 不一致",
        image.dimensions(),
        self.width,
        self.height
      )));
    }
    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| SaveVideoFileError::EncodingError("编码器输入已关闭".to_string()))?;
    stdin.write_all(image.as_raw()).map_err(|e| {
      if e.kind() == ErrorKind::BrokenPipe {
        SaveVideoFileError::EncodingError("ffmpeg 提前退出".to_string())
      } else {
        SaveVideoFileError::IoError(e)
      }
    })
  }

  /// 关闭输入并等待编码结束
  fn finish(mut self) -> Result<(), SaveVideoFileError> {
    drop(self.stdin.take());
    let status = self.child.wait()?;
    let stderr = match self.stderr.take().map(JoinHandle::join) {
      Some(Ok(stderr)) => stderr,
      Some(Err(_)) => "错误输出读取线程异常退出".to_string(),
      None => String::new(),
    };
    if status.success() {
      Ok(())
    } else {
      error!("ffmpeg 错误: {}", stderr);
      Err(SaveVideoFileError::EncodingError(format!("ffmpeg 失败: {}", stderr.trim())))
    }
  }
}

impl Drop for Encoder {
  fn drop(&mut self) {
    drop(self.stdin.take());
    if let Err(e) = self.child.kill()
      && e.kind() != ErrorKind::InvalidInput
    {
      warn!("结束 ffmpeg 编码进程失败: {}", e);
    }
    let _ = self.child.wait();
    if let Some(stderr) = self.stderr.take() {
      let _ = stderr.join();
    }
  }
}

pub struct SaveVideoFileOutput {
  path: PathBuf,
  fps: Option<f64>,
  codec: String,
  stream_fps: Option<f64>,
  encoder: Option<Encoder>,
  frames_written: u64,
}

impl SaveVideoFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      fps: None,
      codec: DEFAULT_CODEC.to_string(),
      stream_fps: None,
      encoder: None,
      frames_written: 0,
    }
  }

  fn output_fps(&self) -> f64 {
    self.fps.or(self.stream_fps).unwrap_or(DEFAULT_FPS)
  }
}

impl FromUrlWithScheme for SaveVideoFileOutput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for SaveVideoFileOutput {
  type Error = SaveVideoFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveVideoFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut output = Self::new(uri.path());

    if let Some(fps) = query_value(uri, "fps") {
      let fps = fps
        .parse::<f64>()
        .map_err(|e| SaveVideoFileError::ValidationError(format!("无效的帧率 {}: {}", fps, e)))?;
      if !(MIN_FPS..=MAX_FPS).contains(&fps) {
        return Err(SaveVideoFileError::ValidationError(format!(
          "FPS {} 超出有效范围 [{}, {}]",
          fps, MIN_FPS, MAX_FPS
        )));
      }
      output.fps = Some(fps);
    }
    if let Some(codec) = query_value(uri, "codec") {
      output.codec = codec;
    }

    Ok(output)
  }
}

impl Render for SaveVideoFileOutput {
  fn begin(&mut self, info: &StreamInfo) -> Result<(), OutputError> {
    self.stream_fps = Some(info.fps_or_default());
    Ok(())
  }

  fn render_frame(&mut self, annotated: &RgbImage, _evaluation: &Evaluation) -> Result<(), OutputError> {
    if self.encoder.is_none() {
      let encoder = Encoder::spawn(
        &self.path,
        annotated.width(),
        annotated.height(),
        self.output_fps(),
        &self.codec,
      )?;
      self.encoder = Some(encoder);
    }
    if let Some(encoder) = self.encoder.as_mut() {
      encoder.write(annotated)?;
    }
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    let Some(encoder) = self.encoder.take() else {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    };
    encoder.finish()?;
    info!("视频已保存到文件: {} ({} 帧)", self.path.display(), self.frames_written);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_overrides_defaults() {
    let url = Url::parse("video:///tmp/out.mp4?fps=30&codec=mpeg4").unwrap();
    let output = SaveVideoFileOutput::from_url(&url).unwrap();
    assert_eq!(output.fps, Some(30.0));
    assert_eq!(output.codec, "mpeg4");
    assert_eq!(output.output_fps(), 30.0);
  }

  #[test]
  fn fps_follows_stream_without_override() {
    let url = Url::parse("video:///tmp/out.mp4").unwrap();
    let mut output = SaveVideoFileOutput::from_url(&url).unwrap();
    output
      .begin(&StreamInfo {
        width: 4,
        height: 4,
        fps: Some(12.5),
      })
      .unwrap();
    assert_eq!(output.output_fps(), 12.5);
  }

  #[test]
  fn odd_sizes_pad_to_even() {
    assert_eq!(padded_size(640, 360), (640, 360));
    assert_eq!(padded_size(641, 360), (642, 360));
    assert_eq!(padded_size(5, 3), (6, 4));
  }

  #[cfg(unix)]
  #[test]
  fn verbose_encoder_does_not_block_on_stderr() {
    // 先写出远超管道容量的错误输出，再开始消费标准输入
    let mut command = Command::new("sh");
    command.args(["-c", "head -c 1048576 /dev/zero >&2; cat > /dev/null"]);
    let mut encoder = Encoder::start(command, 64, 64).unwrap();

    let frame = RgbImage::new(64, 64);
    for _ in 0..64 {
      encoder.write(&frame).unwrap();
    }
    encoder.finish().unwrap();
  }

  #[cfg(unix)]
  #[test]
  fn encoder_failure_reports_stderr() {
    let mut command = Command::new("sh");
    command.args(["-c", "cat > /dev/null; echo broken codec >&2; exit 3"]);
    let encoder = Encoder::start(command, 2, 2).unwrap();

    match encoder.finish() {
      Err(SaveVideoFileError::EncodingError(message)) => assert!(message.contains("broken codec")),
      other => panic!("unexpected result: {:?}", other),
    }
  }

  #[test]
  fn out_of_range_fps_is_rejected() {
    let url = Url::parse("video:///tmp/out.mp4?fps=500").unwrap();
    assert!(matches!(
      SaveVideoFileOutput::from_url(&url),
      Err(SaveVideoFileError::ValidationError(_))
    ));
  }
}
