// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/draw.rs - 检测结果与告警可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::{
  model::BBox,
  policy::{Evaluation, FlaggedDetection, Overlay, PolicyFlag},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;

pub const ALERT_COLOR: [u8; 3] = [255, 0, 0];
pub const NORMAL_COLOR: [u8; 3] = [23, 255, 245];
pub const GRANTED_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

const NORMAL_THICKNESS: i32 = 2;
const ALERT_THICKNESS: i32 = 3;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体加载错误: {0}")]
  FontLoadError(String),
}

/// 标注器
///
/// 只读取评估结果，不修改检测数据。没有配置字体时仍会画出边框和标签底色，只是不写字。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::FontLoadError(format!("{}: {}", path.display(), e)))?;
    info!("加载标注字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 返回标注后的新图像
  ///
  /// 没有检测结果也没有静态标注时，返回原图的副本。
  pub fn annotate(&self, image: &RgbImage, evaluation: &Evaluation, overlay: Option<&Overlay>) -> RgbImage {
    let mut canvas = image.clone();

    if let Some(overlay) = overlay {
      self.draw_bbox_with_label(&mut canvas, overlay.area, &overlay.caption, ALERT_COLOR, NORMAL_THICKNESS);
    }

    for flagged in &evaluation.detections {
      let (color, thickness) = style(&flagged.flag);
      self.draw_bbox_with_label(
        &mut canvas,
        flagged.detection.bbox(),
        &caption(flagged),
        color,
        thickness,
      );
    }
    canvas
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: BBox, label: &str, color: [u8; 3], thickness: i32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = bbox.x1.clamp(0, w - 1);
    let y_min = bbox.y1.clamp(0, h - 1);
    let x_max = bbox.x2.clamp(0, w - 1);
    let y_max = bbox.y2.clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 向内逐像素加粗
    for t in 0..thickness {
      let (x0, y0, x1, y1) = (x_min + t, y_min + t, x_max - t, y_max - t);
      if x0 >= x1 || y0 >= y1 {
        break;
      }
      let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    // 标签放在边框上方，顶到画面边缘时贴边
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height.min(h - label_y).max(0) as u32;
    if label_width == 0 || label_height == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, Rgb(color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }
}

fn style(flag: &PolicyFlag) -> ([u8; 3], i32) {
  match flag {
    PolicyFlag::Restricted | PolicyFlag::Weapon | PolicyFlag::Sighted => (ALERT_COLOR, ALERT_THICKNESS),
    PolicyFlag::Denied { .. } => (ALERT_COLOR, NORMAL_THICKNESS),
    PolicyFlag::Authorized { .. } => (GRANTED_COLOR, NORMAL_THICKNESS),
    PolicyFlag::Benign | PolicyFlag::Unverified => (NORMAL_COLOR, NORMAL_THICKNESS),
  }
}

fn caption(flagged: &FlaggedDetection) -> String {
  let detection = &flagged.detection;
  match &flagged.flag {
    PolicyFlag::Authorized { name, .. } => format!("{} - Access Granted", name),
    PolicyFlag::Denied { .. } => "Access Denied".to_string(),
    PolicyFlag::Restricted => format!("ALERT {} {:.2}", detection.label(), detection.confidence()),
    PolicyFlag::Weapon => format!("WEAPON {} {:.2}", detection.label(), detection.confidence()),
    PolicyFlag::Sighted => format!("DETECTED {} {:.2}", detection.label(), detection.confidence()),
    PolicyFlag::Benign | PolicyFlag::Unverified => {
      format!("{} {:.2}", detection.label(), detection.confidence())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Detection;

  fn gray() -> RgbImage {
    RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]))
  }

  #[test]
  fn nothing_to_draw_returns_copy() {
    let image = gray();
    let annotated = Draw::default().annotate(&image, &Evaluation::default(), None);
    assert_eq!(annotated, image);
  }

  #[test]
  fn zone_overlay_is_drawn_without_detections() {
    let overlay = Overlay {
      area: BBox::new(10, 30, 50, 60),
      caption: "Restricted Area".to_string(),
    };
    let annotated = Draw::default().annotate(&gray(), &Evaluation::default(), Some(&overlay));

    assert_eq!(annotated.get_pixel(30, 60), &Rgb(ALERT_COLOR));
    assert_eq!(annotated.get_pixel(50, 45), &Rgb(ALERT_COLOR));
    assert_eq!(annotated.get_pixel(30, 45), &Rgb([40, 40, 40]));
  }

  #[test]
  fn alerts_and_benign_use_distinct_colors() {
    let evaluation = Evaluation {
      detections: vec![
        FlaggedDetection {
          detection: Detection::new("knife", 0.9, BBox::new(30, 30, 40, 40)).unwrap(),
          flag: PolicyFlag::Weapon,
        },
        FlaggedDetection {
          detection: Detection::new("cup", 0.9, BBox::new(45, 45, 60, 60)).unwrap(),
          flag: PolicyFlag::Benign,
        },
      ],
      events: Vec::new(),
    };
    let before = evaluation.clone();
    let annotated = Draw::default().annotate(&gray(), &evaluation, None);

    assert_eq!(annotated.get_pixel(35, 40), &Rgb(ALERT_COLOR));
    assert_eq!(annotated.get_pixel(50, 60), &Rgb(NORMAL_COLOR));
    assert_eq!(evaluation, before);
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::with_font_file("/definitely/not/a/font.ttf"),
      Err(DrawError::IoError(_))
    ));
  }
}
