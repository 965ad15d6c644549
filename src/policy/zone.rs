// 该文件是 Shaowang （哨望） 项目的一部分。
// src/policy/zone.rs - 禁区闯入策略
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

use std::collections::HashSet;

use crate::{
  model::{BBox, Detection},
  policy::{AlertReason, Overlay, Policy, PolicyFlag, Verdict},
};

pub const DEFAULT_ZONE_AREA: BBox = BBox {
  x1: 150,
  y1: 150,
  x2: 400,
  y2: 350,
};
pub const DEFAULT_ZONE_LABELS: &[&str] = &["person", "car", "bag", "suitcase", "knife", "pistol"];
pub const DEFAULT_ZONE_CONFIDENCE: f32 = 0.5;

const ZONE_CAPTION: &str = "Restricted Area";

/// 标签属于关注集合，且中心点落在禁区内（含边界）即为闯入
#[derive(Debug, Clone)]
pub struct ZonePolicy {
  labels: HashSet<String>,
  area: BBox,
}

impl Default for ZonePolicy {
  fn default() -> Self {
    Self::new(DEFAULT_ZONE_LABELS.iter().copied(), DEFAULT_ZONE_AREA)
  }
}

impl ZonePolicy {
  pub fn new<I, S>(labels: I, area: BBox) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      labels: labels.into_iter().map(Into::into).collect(),
      area,
    }
  }

  pub fn area(&self) -> BBox {
    self.area
  }

  pub fn is_restricted(&self, detection: &Detection) -> bool {
    self.labels.contains(detection.label()) && self.area.contains(detection.center())
  }
}

impl Policy for ZonePolicy {
  fn judge(&self, detection: Detection) -> Verdict {
    if self.is_restricted(&detection) {
      Verdict {
        detection,
        flag: PolicyFlag::Restricted,
        reason: Some(AlertReason::ZoneIntrusion),
      }
    } else {
      Verdict::benign(detection)
    }
  }

  fn overlay(&self) -> Option<Overlay> {
    Some(Overlay {
      area: self.area,
      caption: ZONE_CAPTION.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 构造中心点恰好为 (cx, cy) 的检测框
  fn centered(label: &str, cx: i32, cy: i32) -> Detection {
    Detection::new(label, 0.9, BBox::new(cx - 10, cy - 10, cx + 10, cy + 10)).unwrap()
  }

  #[test]
  fn boundaries_are_inclusive() {
    let policy = ZonePolicy::new(["person"], BBox::new(100, 100, 200, 300));

    for (cx, cy) in [(100, 150), (200, 150), (150, 100), (150, 300), (100, 100), (200, 300)] {
      assert!(policy.is_restricted(&centered("person", cx, cy)), "({cx}, {cy})");
    }
    for (cx, cy) in [(99, 150), (201, 150), (150, 99), (150, 301)] {
      assert!(!policy.is_restricted(&centered("person", cx, cy)), "({cx}, {cy})");
    }
  }

  #[test]
  fn label_must_be_relevant() {
    let policy = ZonePolicy::default();
    assert!(policy.is_restricted(&centered("suitcase", 200, 200)));
    assert!(!policy.is_restricted(&centered("dog", 200, 200)));

    let verdict = policy.judge(centered("dog", 200, 200));
    assert_eq!(verdict.flag, PolicyFlag::Benign);
    assert_eq!(verdict.reason, None);
  }

  #[test]
  fn overlay_is_static() {
    let overlay = ZonePolicy::default().overlay().unwrap();
    assert_eq!(overlay.area, DEFAULT_ZONE_AREA);
    assert_eq!(overlay.caption, "Restricted Area");
  }
}
