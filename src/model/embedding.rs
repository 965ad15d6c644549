// 该文件是 Shaowang （哨望） 项目的一部分。
// src/model/embedding.rs - 为检测结果附加人脸特征
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

use image::imageops;
use tracing::debug;

use crate::{
  frame::Frame,
  model::{Detection, FaceEmbedder, Model, ModelError},
};

/// 先检测人脸框，再从帧中裁出每个框计算特征
///
/// 已经带有特征的检测结果原样保留。
pub struct EmbeddingModel<M, E> {
  detector: M,
  embedder: E,
}

impl<M, E> EmbeddingModel<M, E> {
  pub fn new(detector: M, embedder: E) -> Self {
    Self { detector, embedder }
  }
}

impl<M: Model, E: FaceEmbedder> Model for EmbeddingModel<M, E> {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
    let detections = self.detector.detect(frame)?;
    let (w, h) = (frame.width() as i32, frame.height() as i32);

    let mut result = Vec::with_capacity(detections.len());
    for detection in detections {
      if detection.embedding().is_some() {
        result.push(detection);
        continue;
      }

      let bbox = detection.bbox();
      if w == 0 || h == 0 || bbox.x2 < 0 || bbox.y2 < 0 || bbox.x1 >= w || bbox.y1 >= h {
        debug!("帧 {}: 人脸框 {:?} 在画面之外", frame.index, bbox);
        result.push(detection);
        continue;
      }

      // 边框两端都属于框内
      let x1 = bbox.x1.clamp(0, w - 1);
      let y1 = bbox.y1.clamp(0, h - 1);
      let x2 = bbox.x2.clamp(0, w - 1);
      let y2 = bbox.y2.clamp(0, h - 1);
      let crop = imageops::crop_imm(
        &frame.image,
        x1 as u32,
        y1 as u32,
        (x2 - x1 + 1) as u32,
        (y2 - y1 + 1) as u32,
      )
      .to_image();

      match self.embedder.embed(&crop)? {
        Some(embedding) => result.push(detection.with_embedding(embedding)),
        None => result.push(detection),
      }
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::model::BBox;

  struct FixedBoxes(Vec<BBox>);

  impl Model for FixedBoxes {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, ModelError> {
      self
        .0
        .iter()
        .map(|bbox| Detection::new("face", 0.9, *bbox))
        .collect()
    }
  }

  /// 特征为裁剪区域的平均红色分量
  struct MeanRed;

  impl FaceEmbedder for MeanRed {
    fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError> {
      let n = (face.width() * face.height()) as f32;
      let sum: f32 = face.pixels().map(|p| p[0] as f32).sum();
      Ok(Some(vec![sum / n]))
    }
  }

  /// 特征为裁剪区域的宽和高
  struct CropSize;

  impl FaceEmbedder for CropSize {
    fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError> {
      Ok(Some(vec![face.width() as f32, face.height() as f32]))
    }
  }

  #[test]
  fn crops_each_box_before_embedding() {
    let mut image = RgbImage::new(10, 10);
    for y in 0..5 {
      for x in 0..5 {
        image.put_pixel(x, y, Rgb([200, 0, 0]));
      }
    }
    let frame = Frame::new(image, 0, 0);

    let model = EmbeddingModel::new(
      FixedBoxes(vec![BBox::new(0, 0, 4, 4), BBox::new(5, 5, 9, 9), BBox::new(20, 20, 30, 30)]),
      MeanRed,
    );
    let detections = model.detect(&frame).unwrap();

    assert_eq!(detections[0].embedding(), Some(&[200.0][..]));
    assert_eq!(detections[1].embedding(), Some(&[0.0][..]));
    assert_eq!(detections[2].embedding(), None);
  }

  #[test]
  fn crop_includes_right_and_bottom_edges() {
    let frame = Frame::new(RgbImage::new(10, 8), 0, 0);
    let model = EmbeddingModel::new(
      FixedBoxes(vec![
        BBox::new(2, 3, 5, 3),
        BBox::new(0, 0, 9, 7),
        BBox::new(-4, -4, 20, 20),
        BBox::new(9, 7, 9, 7),
        BBox::new(-5, 0, -1, 7),
      ]),
      CropSize,
    );
    let detections = model.detect(&frame).unwrap();

    assert_eq!(detections[0].embedding(), Some(&[4.0, 1.0][..]));
    assert_eq!(detections[1].embedding(), Some(&[10.0, 8.0][..]));
    assert_eq!(detections[2].embedding(), Some(&[10.0, 8.0][..]));
    assert_eq!(detections[3].embedding(), Some(&[1.0, 1.0][..]));
    assert_eq!(detections[4].embedding(), None);
  }
}
