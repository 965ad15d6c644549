// 该文件是 Shaowang （哨望） 项目的一部分。
// src/model/thumbnail.rs - 缩略图特征
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

use image::{RgbImage, imageops};

use crate::model::{FaceEmbedder, ModelError};

const DEFAULT_SIDE: u32 = 16;

/// 基线人脸特征：灰度缩略图去均值后做 L2 归一化
///
/// 没有真实人脸模型时用于联调；纯色图像视为没有可用人脸。
#[derive(Debug, Clone)]
pub struct ThumbnailEmbedder {
  side: u32,
}

impl Default for ThumbnailEmbedder {
  fn default() -> Self {
    Self { side: DEFAULT_SIDE }
  }
}

impl ThumbnailEmbedder {
  pub fn with_side(side: u32) -> Self {
    Self { side: side.max(1) }
  }

  pub fn dimension(&self) -> usize {
    (self.side * self.side) as usize
  }
}

impl FaceEmbedder for ThumbnailEmbedder {
  fn embed(&self, face: &RgbImage) -> Result<Option<Vec<f32>>, ModelError> {
    if face.width() == 0 || face.height() == 0 {
      return Ok(None);
    }

    let gray = imageops::grayscale(face);
    let thumb = imageops::resize(&gray, self.side, self.side, imageops::FilterType::Triangle);

    // 灰度全等的缩略图没有可比较的结构
    let mut levels = thumb.pixels().map(|p| p[0]);
    let first = levels.next().unwrap_or_default();
    if levels.all(|v| v == first) {
      return Ok(None);
    }

    let values: Vec<f32> = thumb.pixels().map(|p| p[0] as f32 / 255.0).collect();
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();
    let norm = centered.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm < f32::EPSILON {
      return Ok(None);
    }
    Ok(Some(centered.into_iter().map(|v| v / norm).collect()))
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  #[test]
  fn flat_image_has_no_face() {
    let face = RgbImage::from_pixel(20, 20, Rgb([128, 128, 128]));
    assert_eq!(ThumbnailEmbedder::default().embed(&face).unwrap(), None);
  }

  #[test]
  fn every_gray_level_is_flat() {
    let embedder = ThumbnailEmbedder::default();
    for v in 0..=255u8 {
      let face = RgbImage::from_pixel(32, 32, Rgb([v, v, v]));
      assert_eq!(embedder.embed(&face).unwrap(), None, "gray level {}", v);
    }
  }

  #[test]
  fn single_step_is_not_flat() {
    let face = RgbImage::from_fn(32, 32, |x, _| if x < 16 { Rgb([90, 90, 90]) } else { Rgb([91, 91, 91]) });
    let embedding = ThumbnailEmbedder::default().embed(&face).unwrap().unwrap();
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-3);
  }

  #[test]
  fn embedding_is_unit_length() {
    let face = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
    let embedder = ThumbnailEmbedder::with_side(8);
    let embedding = embedder.embed(&face).unwrap().unwrap();
    assert_eq!(embedding.len(), embedder.dimension());
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
  }
}
