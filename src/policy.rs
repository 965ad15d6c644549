// 该文件是 Shaowang （哨望） 项目的一部分。
// src/policy.rs - 告警策略
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

//! 告警策略
//!
//! 策略是纯函数：输入一帧的检测结果，输出带标记的检测结果和告警事件。
//! 时间戳由调用方通过 [`FrameStamp`] 传入，策略本身不读时钟，也不做任何 I/O。

use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::model::{BBox, Detection, round4, serialize_rounded};

mod identity;
mod keyword;
mod label_set;
mod zone;

pub use self::identity::{DEFAULT_IDENTITY_THRESHOLD, IdentityPolicy, UNKNOWN_IDENTITY};
pub use self::keyword::{DEFAULT_KEYWORD_CONFIDENCE, DEFAULT_KEYWORDS, KeywordPolicy};
pub use self::label_set::{
  AnnotatePolicy, DEFAULT_ANNOTATE_CONFIDENCE, DEFAULT_LABEL_SET, DEFAULT_LABEL_SET_CONFIDENCE, LabelSetPolicy,
};
pub use self::zone::{DEFAULT_ZONE_AREA, DEFAULT_ZONE_CONFIDENCE, DEFAULT_ZONE_LABELS, ZonePolicy};

/// 帧序号、媒体时间与墙上时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStamp {
  pub frame_index: u64,
  /// 帧在输入媒体中的时间位置
  pub timestamp_ms: u64,
  pub timestamp: String,
}

impl FrameStamp {
  pub fn new(frame_index: u64, timestamp_ms: u64, timestamp: impl Into<String>) -> Self {
    Self {
      frame_index,
      timestamp_ms,
      timestamp: timestamp.into(),
    }
  }

  /// 墙上时间取本地时间，格式 `%H:%M:%S`
  pub fn now(frame_index: u64, timestamp_ms: u64) -> Self {
    Self::new(
      frame_index,
      timestamp_ms,
      chrono::Local::now().format("%H:%M:%S").to_string(),
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
  ZoneIntrusion,
  WeaponMatch,
  IdentityDenied,
  IdentityGranted,
  LabelMatch,
}

/// 策略给单个检测结果打的标记
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyFlag {
  Benign,
  Restricted,
  Weapon,
  Authorized {
    name: String,
    #[serde(serialize_with = "serialize_rounded")]
    distance: f32,
  },
  Denied {
    #[serde(serialize_with = "serialize_rounded_opt")]
    distance: Option<f32>,
  },
  /// 没有人脸特征，无法比对
  Unverified,
  /// 标签在关注集合中
  Sighted,
}

impl PolicyFlag {
  /// 是否需要以告警样式绘制
  pub fn is_alert(&self) -> bool {
    matches!(
      self,
      Self::Restricted | Self::Weapon | Self::Denied { .. } | Self::Sighted
    )
  }
}

fn serialize_rounded_opt<S: Serializer>(value: &Option<f32>, serializer: S) -> Result<S::Ok, S::Error> {
  match value {
    Some(v) => serializer.serialize_f64(round4(*v)),
    None => serializer.serialize_none(),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedDetection {
  #[serde(flatten)]
  pub detection: Detection,
  pub flag: PolicyFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
  #[serde(flatten)]
  pub detection: Detection,
  pub reason: AlertReason,
  pub frame_index: u64,
  pub timestamp_ms: u64,
  pub timestamp: String,
}

/// 一帧的评估结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
  pub detections: Vec<FlaggedDetection>,
  pub events: Vec<AlertEvent>,
}

impl Evaluation {
  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn has_alert(&self) -> bool {
    self.detections.iter().any(|d| d.flag.is_alert())
  }
}

/// 与检测无关、每帧都要绘制的静态标注
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub area: BBox,
  pub caption: String,
}

/// 单个检测结果的判定
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
  pub detection: Detection,
  pub flag: PolicyFlag,
  pub reason: Option<AlertReason>,
}

impl Verdict {
  pub fn benign(detection: Detection) -> Self {
    Self {
      detection,
      flag: PolicyFlag::Benign,
      reason: None,
    }
  }
}

pub trait Policy {
  /// 判定单个检测结果，可以改写标签
  fn judge(&self, detection: Detection) -> Verdict;

  fn overlay(&self) -> Option<Overlay> {
    None
  }

  /// 每个带告警原因的判定恰好产生一个事件
  fn evaluate(&self, detections: Vec<Detection>, stamp: &FrameStamp) -> Evaluation {
    let mut evaluation = Evaluation {
      detections: Vec::with_capacity(detections.len()),
      events: Vec::new(),
    };

    for detection in detections {
      let Verdict {
        detection,
        flag,
        reason,
      } = self.judge(detection);
      if let Some(reason) = reason {
        evaluation.events.push(AlertEvent {
          detection: detection.clone(),
          reason,
          frame_index: stamp.frame_index,
          timestamp_ms: stamp.timestamp_ms,
          timestamp: stamp.timestamp.clone(),
        });
      }
      evaluation.detections.push(FlaggedDetection { detection, flag });
    }
    evaluation
  }
}

impl<P: Policy + ?Sized> Policy for &P {
  fn judge(&self, detection: Detection) -> Verdict {
    (**self).judge(detection)
  }

  fn overlay(&self) -> Option<Overlay> {
    (**self).overlay()
  }
}

impl<P: Policy + ?Sized> Policy for Box<P> {
  fn judge(&self, detection: Detection) -> Verdict {
    (**self).judge(detection)
  }

  fn overlay(&self) -> Option<Overlay> {
    (**self).overlay()
  }
}

impl<P: Policy + ?Sized> Policy for Arc<P> {
  fn judge(&self, detection: Detection) -> Verdict {
    (**self).judge(detection)
  }

  fn overlay(&self) -> Option<Overlay> {
    (**self).overlay()
  }
}

/// 内置策略的封闭集合
pub enum PolicyKind {
  Zone(ZonePolicy),
  Keyword(KeywordPolicy),
  Identity(IdentityPolicy),
  LabelSet(LabelSetPolicy),
  Annotate(AnnotatePolicy),
}

impl PolicyKind {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Zone(_) => "zone",
      Self::Keyword(_) => "weapon",
      Self::Identity(_) => "face",
      Self::LabelSet(_) => "human",
      Self::Annotate(_) => "annotate",
    }
  }
}

impl Policy for PolicyKind {
  fn judge(&self, detection: Detection) -> Verdict {
    match self {
      Self::Zone(p) => p.judge(detection),
      Self::Keyword(p) => p.judge(detection),
      Self::Identity(p) => p.judge(detection),
      Self::LabelSet(p) => p.judge(detection),
      Self::Annotate(p) => p.judge(detection),
    }
  }

  fn overlay(&self) -> Option<Overlay> {
    match self {
      Self::Zone(p) => p.overlay(),
      Self::Keyword(p) => p.overlay(),
      Self::Identity(p) => p.overlay(),
      Self::LabelSet(p) => p.overlay(),
      Self::Annotate(p) => p.overlay(),
    }
  }
}

impl From<ZonePolicy> for PolicyKind {
  fn from(p: ZonePolicy) -> Self {
    Self::Zone(p)
  }
}

impl From<KeywordPolicy> for PolicyKind {
  fn from(p: KeywordPolicy) -> Self {
    Self::Keyword(p)
  }
}

impl From<IdentityPolicy> for PolicyKind {
  fn from(p: IdentityPolicy) -> Self {
    Self::Identity(p)
  }
}

impl From<LabelSetPolicy> for PolicyKind {
  fn from(p: LabelSetPolicy) -> Self {
    Self::LabelSet(p)
  }
}

impl From<AnnotatePolicy> for PolicyKind {
  fn from(p: AnnotatePolicy) -> Self {
    Self::Annotate(p)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn events_carry_stamp() {
    let policy = PolicyKind::from(KeywordPolicy::default());
    let detections = vec![
      Detection::new("knife", 0.8, BBox::new(0, 0, 4, 4)).unwrap(),
      Detection::new("cup", 0.8, BBox::new(0, 0, 4, 4)).unwrap(),
    ];
    let evaluation = policy.evaluate(detections, &FrameStamp::new(7, 280, "12:00:01"));

    assert_eq!(evaluation.detections.len(), 2);
    assert_eq!(evaluation.events.len(), 1);
    assert_eq!(evaluation.events[0].frame_index, 7);
    assert_eq!(evaluation.events[0].timestamp_ms, 280);
    assert_eq!(evaluation.events[0].timestamp, "12:00:01");
    assert_eq!(evaluation.events[0].reason, AlertReason::WeaponMatch);
    assert!(evaluation.has_alert());
  }

  #[test]
  fn flagged_detection_serializes_flat() {
    let flagged = FlaggedDetection {
      detection: Detection::new("alice", 0.9, BBox::new(0, 0, 2, 2)).unwrap(),
      flag: PolicyFlag::Denied { distance: None },
    };
    let value = serde_json::to_value(&flagged).unwrap();
    assert_eq!(value["label"], "alice");
    assert_eq!(value["flag"]["kind"], "denied");
    assert!(value["flag"]["distance"].is_null());
  }

  #[test]
  fn event_json_carries_media_time() {
    let policy = PolicyKind::from(LabelSetPolicy::default());
    let detections = vec![Detection::new("person", 0.9, BBox::new(0, 0, 4, 4)).unwrap()];
    let evaluation = policy.evaluate(detections, &FrameStamp::new(12, 500, "09:30:00"));

    let value = serde_json::to_value(&evaluation.events[0]).unwrap();
    assert_eq!(value["reason"], "label_match");
    assert_eq!(value["frame_index"], 12);
    assert_eq!(value["timestamp_ms"], 500);
    assert_eq!(value["timestamp"], "09:30:00");
    assert_eq!(policy.name(), "human");
  }

  #[test]
  fn stamp_uses_wall_clock_format() {
    let stamp = FrameStamp::now(3, 120);
    assert_eq!(stamp.timestamp_ms, 120);
    assert_eq!(stamp.timestamp.len(), 8);
    assert_eq!(stamp.timestamp.matches(':').count(), 2);
  }
}
