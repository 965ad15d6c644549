// 该文件是 Shaowang （哨望） 项目的一部分。
// src/input/ffmpeg_video.rs - 基于 ffmpeg 命令行的视频输入
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

//! 视频文件输入
//!
//! 先用 `ffprobe` 读出分辨率和帧率，再让 `ffmpeg` 把解码后的 RGB24 原始帧写到标准输出，
//! 每次读取恰好一帧。
//!
//! 带旋转元数据的视频（常见于手机拍摄）由 ffmpeg 自动转正，
//! 因此帧尺寸按转正后的宽高计算，并要求 ffmpeg 按该尺寸输出。
//!
//! # URL 格式
//!
//! - `video:///path/to/input.mp4`
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamInfo},
  input::{FrameSource, InputError},
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
  #[serde(default)]
  tags: ProbeTags,
  #[serde(default)]
  side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
  rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
  rotation: Option<f64>,
}

impl ProbeStream {
  /// 顺时针旋转角度，取值 0、90、180、270
  ///
  /// 新版 ffprobe 把旋转写在显示矩阵的 side data 中，旧版写在 `rotate` 标签中。
  fn rotation(&self) -> u32 {
    let degrees = self
      .side_data_list
      .iter()
      .find_map(|side| side.rotation)
      .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
      .unwrap_or(0.0);
    let quarter = (degrees / 90.0).round() as i64;
    (quarter.rem_euclid(4) * 90) as u32
  }

  /// 自动转正后的帧尺寸
  fn display_size(&self) -> Option<(u32, u32)> {
    let (width, height) = (self.width?, self.height?);
    match self.rotation() {
      90 | 270 => Some((height, width)),
      _ => Some((width, height)),
    }
  }
}

/// 解析 "30000/1001" 形式的帧率，"0/0" 视为未知
fn parse_rate(rate: &str) -> Option<f64> {
  let (num, den) = rate.split_once('/')?;
  let num: f64 = num.trim().parse().ok()?;
  let den: f64 = den.trim().parse().ok()?;
  let fps = num / den;
  (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn probe(path: &Path) -> Result<StreamInfo, InputError> {
  let output = Command::new("ffprobe")
    .args(["-v", "error", "-select_streams", "v:0"])
    .args([
      "-show_entries",
      "stream=width,height,avg_frame_rate,r_frame_rate:stream_tags=rotate:stream_side_data=rotation",
    ])
    .args(["-of", "json"])
    .arg(path)
    .output()
    .map_err(|e| InputError::unavailable(path.display(), format!("无法执行 ffprobe (请确保已安装): {}", e)))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(InputError::unavailable(path.display(), stderr.trim()));
  }

  let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
    .map_err(|e| InputError::unavailable(path.display(), format!("ffprobe 输出无法解析: {}", e)))?;
  let stream = probe
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| InputError::unavailable(path.display(), "找不到视频流"))?;

  let Some((width, height)) = stream.display_size() else {
    return Err(InputError::unavailable(path.display(), "视频流缺少分辨率"));
  };
  if stream.rotation() != 0 {
    debug!("视频 {} 带有 {} 度旋转, 转正后为 {}x{}", path.display(), stream.rotation(), width, height);
  }
  if width == 0 || height == 0 {
    return Err(InputError::unavailable(path.display(), "视频分辨率为 0"));
  }

  let fps = stream
    .avg_frame_rate
    .as_deref()
    .and_then(parse_rate)
    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));

  Ok(StreamInfo { width, height, fps })
}

/// 解码命令参数，输出尺寸固定为探测得到的帧尺寸
fn decoder_args(path: &Path, info: &StreamInfo) -> Vec<OsString> {
  let size = format!("{}x{}", info.width, info.height);
  let mut args: Vec<OsString> = vec!["-v".into(), "error".into(), "-nostdin".into(), "-i".into()];
  args.push(path.into());
  args.extend(["-s", size.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "-"].map(OsString::from));
  args
}

/// ffmpeg 解码进程，析构时结束子进程
struct Decoder {
  child: Child,
  stdout: ChildStdout,
}

impl Drop for Decoder {
  fn drop(&mut self) {
    if let Err(e) = self.child.kill()
      && e.kind() != ErrorKind::InvalidInput
    {
      warn!("结束 ffmpeg 解码进程失败: {}", e);
    }
    if let Err(e) = self.child.wait() {
      warn!("等待 ffmpeg 解码进程失败: {}", e);
    }
  }
}

pub struct FfmpegVideoInput {
  path: PathBuf,
  info: StreamInfo,
  decoder: Option<Decoder>,
  next_index: u64,
}

impl FfmpegVideoInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref().to_path_buf();
    if !path.is_file() {
      return Err(InputError::unavailable(path.display(), "文件不存在"));
    }

    let info = probe(&path)?;
    info!(
      "打开视频 {}: {}x{} @ {:?} fps",
      path.display(),
      info.width,
      info.height,
      info.fps
    );

    let mut child = Command::new("ffmpeg")
      .args(decoder_args(&path, &info))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| InputError::unavailable(path.display(), format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let Some(stdout) = child.stdout.take() else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(InputError::unavailable(path.display(), "无法读取 ffmpeg 输出"));
    };

    Ok(Self {
      path,
      info,
      decoder: Some(Decoder { child, stdout }),
      next_index: 0,
    })
  }

  fn frame_len(&self) -> usize {
    self.info.width as usize * self.info.height as usize * 3
  }

  /// 读到流末尾时检查 ffmpeg 的退出状态
  fn finish(&mut self) -> Option<Result<Frame, InputError>> {
    let mut decoder = self.decoder.take()?;
    match decoder.child.wait() {
      Ok(status) if status.success() => {
        debug!("视频 {} 读取完毕, 共 {} 帧", self.path.display(), self.next_index);
        None
      }
      Ok(status) => Some(Err(InputError::Decode(format!(
        "ffmpeg 解码 {} 失败: {}",
        self.path.display(),
        status
      )))),
      Err(e) => Some(Err(InputError::Io(e))),
    }
  }
}

impl FromUrlWithScheme for FfmpegVideoInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for FfmpegVideoInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::scheme_mismatch(Self::SCHEME, url));
    }
    Self::open(url.path())
  }
}

impl Iterator for FfmpegVideoInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut buffer = vec![0u8; self.frame_len()];
    let decoder = self.decoder.as_mut()?;

    match decoder.stdout.read_exact(&mut buffer) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => return self.finish(),
      Err(e) => {
        self.decoder = None;
        return Some(Err(InputError::Io(e)));
      }
    }

    let Some(image) = RgbImage::from_raw(self.info.width, self.info.height, buffer) else {
      self.decoder = None;
      return Some(Err(InputError::Decode("无法创建 RGB 图像".to_string())));
    };

    let index = self.next_index;
    self.next_index += 1;
    let timestamp_ms = (index as f64 * self.info.frame_interval_ms()) as u64;
    Some(Ok(Frame::new(image, index, timestamp_ms)))
  }
}

impl FrameSource for FfmpegVideoInput {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_rates_parse() {
    assert_eq!(parse_rate("25/1"), Some(25.0));
    assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    assert_eq!(parse_rate("0/0"), None);
    assert_eq!(parse_rate("garbage"), None);
  }

  #[test]
  fn missing_file_is_unavailable() {
    assert!(matches!(
      FfmpegVideoInput::open("/definitely/not/here.mp4"),
      Err(InputError::SourceUnavailable { .. })
    ));
  }

  #[test]
  fn probe_output_deserializes() {
    let json = br#"{"streams":[{"width":640,"height":360,"avg_frame_rate":"24/1","r_frame_rate":"24/1"}]}"#;
    let probe: ProbeOutput = serde_json::from_slice(json).unwrap();
    assert_eq!(probe.streams[0].width, Some(640));
    assert_eq!(probe.streams[0].avg_frame_rate.as_deref(), Some("24/1"));
    assert_eq!(probe.streams[0].display_size(), Some((640, 360)));
  }

  #[test]
  fn rotated_streams_swap_dimensions() {
    let json = br#"{"streams":[{"width":1920,"height":1080,"avg_frame_rate":"30/1",
      "side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}]}"#;
    let probe: ProbeOutput = serde_json::from_slice(json).unwrap();
    assert_eq!(probe.streams[0].rotation(), 270);
    assert_eq!(probe.streams[0].display_size(), Some((1080, 1920)));

    let json = br#"{"streams":[{"width":1920,"height":1080,"tags":{"rotate":"90"}}]}"#;
    let probe: ProbeOutput = serde_json::from_slice(json).unwrap();
    assert_eq!(probe.streams[0].display_size(), Some((1080, 1920)));

    let json = br#"{"streams":[{"width":1920,"height":1080,"tags":{"rotate":"180"}}]}"#;
    let probe: ProbeOutput = serde_json::from_slice(json).unwrap();
    assert_eq!(probe.streams[0].display_size(), Some((1920, 1080)));
  }

  #[test]
  fn decoder_output_size_matches_probe() {
    let info = StreamInfo {
      width: 1080,
      height: 1920,
      fps: Some(30.0),
    };
    let args = decoder_args(Path::new("/tmp/portrait.mp4"), &info);
    let size = args.iter().position(|a| a == "-s").unwrap();
    assert_eq!(args[size + 1], "1080x1920");
    let input = args.iter().position(|a| a == "-i").unwrap();
    assert!(input < size);
    assert_eq!(args.last().unwrap(), "-");
  }
}
