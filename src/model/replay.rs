// 该文件是 Shaowang （哨望） 项目的一部分。
// src/model/replay.rs - 回放预先计算的检测结果
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

//! 外部模型离线跑完之后，把逐帧结果写成 JSON，再由 [`ReplayModel`] 回放。
//!
//! ```json
//! [
//!   { "frame_index": 0, "detections": [
//!     { "label": "person", "confidence": 0.91, "bbox": [10, 20, 110, 220] }
//!   ] }
//! ]
//! ```
//!
//! URL 格式：`replay:///path/to/detections.json?confidence=0.5`

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{BBox, Detection, Model, ModelError},
  query_value,
};

const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Deserialize)]
struct ReplayFrame {
  frame_index: u64,
  #[serde(default)]
  detections: Vec<ReplayDetection>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayDetection {
  label: String,
  confidence: f32,
  bbox: BBox,
  #[serde(default)]
  embedding: Option<Vec<f32>>,
}

/// 按帧索引回放检测结果，文件中未出现的帧视为无检测
#[derive(Debug)]
pub struct ReplayModel {
  frames: HashMap<u64, Vec<ReplayDetection>>,
  confidence: f32,
}

impl ReplayModel {
  pub fn from_json_str(json: &str, confidence: f32) -> Result<Self, ModelError> {
    let frames: Vec<ReplayFrame> =
      serde_json::from_str(json).map_err(|e| ModelError::Load(format!("检测文件解析失败: {}", e)))?;

    let mut by_index: HashMap<u64, Vec<ReplayDetection>> = HashMap::new();
    for frame in frames {
      by_index
        .entry(frame.frame_index)
        .or_default()
        .extend(frame.detections);
    }

    debug!("回放文件包含 {} 帧检测结果", by_index.len());
    Ok(Self {
      frames: by_index,
      confidence,
    })
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }
}

impl Model for ReplayModel {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    let Some(items) = self.frames.get(&frame.index) else {
      return Ok(Vec::new());
    };

    let mut detections = Vec::with_capacity(items.len());
    for item in items {
      if item.confidence < self.confidence {
        continue;
      }
      let mut detection = Detection::new(item.label.clone(), item.confidence, item.bbox)?;
      if let Some(embedding) = &item.embedding {
        detection = detection.with_embedding(embedding.clone());
      }
      detections.push(detection);
    }
    Ok(detections)
  }
}

pub struct ReplayModelBuilder {
  path: String,
  confidence: f32,
}

impl FromUrlWithScheme for ReplayModelBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let confidence = match query_value(url, "confidence") {
      Some(v) => v
        .parse::<f32>()
        .map_err(|e| ModelError::Load(format!("无效的置信度 {}: {}", v, e)))?,
      None => DEFAULT_CONFIDENCE,
    };

    Ok(Self {
      path: url.path().to_string(),
      confidence,
    })
  }
}

impl ReplayModelBuilder {
  /// 覆盖置信度下限
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn build(self) -> Result<ReplayModel, ModelError> {
    info!("加载检测文件: {}", self.path);
    let json = std::fs::read_to_string(&self.path)?;
    ReplayModel::from_json_str(&json, self.confidence)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  const FIXTURE: &str = r#"[
    { "frame_index": 0, "detections": [
      { "label": "person", "confidence": 0.91, "bbox": [10, 20, 110, 220] },
      { "label": "cat", "confidence": 0.20, "bbox": [0, 0, 5, 5] }
    ] },
    { "frame_index": 2, "detections": [
      { "label": "face", "confidence": 0.99, "bbox": [0, 0, 8, 8], "embedding": [0.5, 0.5] }
    ] }
  ]"#;

  fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(8, 8), index, 0)
  }

  #[test]
  fn replays_frames_above_floor() {
    let model = ReplayModel::from_json_str(FIXTURE, 0.5).unwrap();

    let first = model.detect(&frame(0)).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].label(), "person");
    assert_eq!(first[0].center(), (60, 120));

    assert!(model.detect(&frame(1)).unwrap().is_empty());

    let third = model.detect(&frame(2)).unwrap();
    assert_eq!(third[0].embedding(), Some(&[0.5, 0.5][..]));
  }

  #[test]
  fn malformed_entries_fail_the_frame() {
    let json = r#"[{ "frame_index": 0, "detections": [
      { "label": "person", "confidence": 0.9, "bbox": [50, 0, 10, 10] }
    ] }]"#;
    let model = ReplayModel::from_json_str(json, 0.1).unwrap();
    assert!(matches!(model.detect(&frame(0)), Err(ModelError::Malformed(_))));
  }

  #[test]
  fn builder_reads_confidence_from_query() {
    let url = Url::parse("replay:///tmp/dets.json?confidence=0.3").unwrap();
    let builder = ReplayModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.path, "/tmp/dets.json");
    assert_eq!(builder.confidence, 0.3);

    let url = Url::parse("image:///tmp/dets.json").unwrap();
    assert!(ReplayModelBuilder::from_url(&url).is_err());
  }
}
