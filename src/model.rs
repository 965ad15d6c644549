// 该文件是 Shaowang （哨望） 项目的一部分。
// src/model.rs - 检测模型接口
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

use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::frame::Frame;

mod embedding;
mod replay;
mod thumbnail;

pub use self::embedding::EmbeddingModel;
pub use self::replay::{ReplayModel, ReplayModelBuilder};
pub use self::thumbnail::ThumbnailEmbedder;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("检测数据格式错误: {0}")]
  Malformed(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型锁已损坏")]
  LockPoisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 检测能力：帧 -> 检测结果
///
/// 置信度下限由实现自身负责，策略层不会再次检查。
/// 实现若不可重入，请用 [`ExclusiveModel`] 包装后再在多个运行之间共享。
pub trait Model {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError>;
}

impl<M: Model + ?Sized> Model for &M {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    (**self).detect(frame)
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    (**self).detect(frame)
  }
}

impl<M: Model + ?Sized> Model for Arc<M> {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    (**self).detect(frame)
  }
}

/// 人脸特征提取能力
pub trait FaceEmbedder {
  /// 返回 `None` 表示图像中没有可用的人脸
  fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError>;
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for &E {
  fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError> {
    (**self).embed(face)
  }
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for Arc<E> {
  fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError> {
    (**self).embed(face)
  }
}

/// 运行级互斥的模型
///
/// 一次运行在开始时取得锁，直到运行结束才释放，
/// 因此同一模型实例上的运行彼此串行。
pub struct ExclusiveModel<M> {
  inner: Mutex<M>,
}

impl<M> ExclusiveModel<M> {
  pub fn new(model: M) -> Self {
    Self {
      inner: Mutex::new(model),
    }
  }

  pub fn lock(&self) -> Result<MutexGuard<'_, M>, ModelError> {
    self.inner.lock().map_err(|_| ModelError::LockPoisoned)
  }
}

/// 像素坐标边界框 [x1, y1, x2, y2]
///
/// 四条边都包含在框内：`x2`、`y2` 是框内最右、最下一列像素，
/// 而不是紧随其后的位置。区域判定、画框与裁剪都按这一约定处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 横向覆盖的像素列数
  pub fn width(&self) -> i64 {
    i64::from(self.x2) - i64::from(self.x1) + 1
  }

  /// 纵向覆盖的像素行数
  pub fn height(&self) -> i64 {
    i64::from(self.y2) - i64::from(self.y1) + 1
  }

  /// 中心点，向下取整
  pub fn center(&self) -> (i32, i32) {
    (midpoint(self.x1, self.x2), midpoint(self.y1, self.y2))
  }

  /// 包含边界
  pub fn contains(&self, (x, y): (i32, i32)) -> bool {
    self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
  }
}

/// 两个 i32 的中点，结果总落在两者之间，因此不会越界
fn midpoint(a: i32, b: i32) -> i32 {
  let mid = (i64::from(a) + i64::from(b)).div_euclid(2);
  i32::try_from(mid).unwrap_or(if mid < 0 { i32::MIN } else { i32::MAX })
}

impl From<[i32; 4]> for BBox {
  fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
    Self::new(x1, y1, x2, y2)
  }
}

impl From<BBox> for [i32; 4] {
  fn from(bbox: BBox) -> Self {
    [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
  }
}

/// 单帧中的一个检测结果，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  label: String,
  #[serde(serialize_with = "serialize_rounded")]
  confidence: f32,
  bbox: BBox,
  center: (i32, i32),
  #[serde(skip)]
  embedding: Option<Vec<f32>>,
}

impl Detection {
  pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Result<Self, ModelError> {
    let label = label.into();
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
      return Err(ModelError::Malformed(format!(
        "{} 的置信度 {} 不在 [0, 1] 之间",
        label, confidence
      )));
    }
    if bbox.x2 < bbox.x1 || bbox.y2 < bbox.y1 {
      return Err(ModelError::Malformed(format!(
        "{} 的边界框 {:?} 坐标颠倒",
        label, bbox
      )));
    }

    Ok(Self {
      label,
      confidence,
      center: bbox.center(),
      bbox,
      embedding: None,
    })
  }

  pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
    self.embedding = Some(embedding);
    self
  }

  /// 复制一份并替换标签
  pub fn relabeled(&self, label: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      ..self.clone()
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn bbox(&self) -> BBox {
    self.bbox
  }

  pub fn center(&self) -> (i32, i32) {
    self.center
  }

  pub fn embedding(&self) -> Option<&[f32]> {
    self.embedding.as_deref()
  }
}

/// 保留四位小数后输出为普通数字
pub(crate) fn serialize_rounded<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_f64(round4(*value))
}

pub(crate) fn round4(value: f32) -> f64 {
  (f64::from(value) * 10_000.0).round() / 10_000.0
}
