// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/directory_record.rs - 告警快照目录输出
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

//! 把带告警的帧按日期存到目录里，供人工复核。
//!
//! URL 格式：
//! - `folder:///path/to/dir` - 只保存带告警的帧
//! - `folder:///path/to/dir?always` - 保存所有帧
//! - `folder:///path/to/dir?record` - 额外写一份同名 JSON，记录该帧的检测结果与事件

use std::path::PathBuf;

use chrono::{Datelike, Local};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputError, Render},
  policy::{AlertEvent, Evaluation, FlaggedDetection},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  detections: &'a [FlaggedDetection],
  events: &'a [AlertEvent],
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  always: bool,
  record: bool,
  frame_counter: u32,
  saved: u64,
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      always: false,
      record: false,
      frame_counter: 0,
      saved: 0,
    }
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn saved(&self) -> u64 {
    self.saved
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    self.frame_counter = self.frame_counter.wrapping_add(1);
    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }

  fn save(&mut self, image: &RgbImage, evaluation: &Evaluation) -> Result<(), DirectoryRecordOutputError> {
    let path = self.frame_path()?;
    image.save(&path)?;
    if self.record {
      let record = FrameRecord {
        detections: &evaluation.detections,
        events: &evaluation.events,
      };
      std::fs::write(path.with_extension("json"), serde_json::to_string_pretty(&record)?)?;
    }
    debug!("保存告警快照: {}", path.display());
    self.saved += 1;
    Ok(())
  }
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut output = Self::new(uri.path()).always(uri.query_pairs().any(|(k, _)| k == "always"));
    output.record = uri.query_pairs().any(|(k, _)| k == "record");
    Ok(output)
  }
}

impl Render for DirectoryRecordOutput {
  fn render_frame(&mut self, annotated: &RgbImage, evaluation: &Evaluation) -> Result<(), OutputError> {
    if self.always || !evaluation.events.is_empty() {
      self.save(annotated, evaluation)?;
    }
    Ok(())
  }
}
