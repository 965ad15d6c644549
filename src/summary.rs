// 该文件是 Shaowang （哨望） 项目的一部分。
// src/summary.rs - 运行统计
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

//! 计数始终精确；样本与事件列表只保留前 `max_logged_events` 条。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::policy::{AlertEvent, AlertReason, Evaluation, FlaggedDetection};

pub const DEFAULT_MAX_LOGGED_EVENTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
  Image,
  Video,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSample {
  pub frame_index: u64,
  pub items: Vec<FlaggedDetection>,
}

/// 一次运行的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
  pub mode: RunMode,
  pub frames_processed: u64,
  pub frames_failed: u64,
  pub detections_total: u64,
  pub alert_total: u64,
  pub alert_counts: BTreeMap<AlertReason, u64>,
  pub sample_detections: Vec<FrameSample>,
  pub alert_events: Vec<AlertEvent>,
}

impl RunSummary {
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }
}

pub struct Aggregator {
  max_logged_events: usize,
  summary: RunSummary,
}

impl Aggregator {
  pub fn new(mode: RunMode, max_logged_events: usize) -> Self {
    Self {
      max_logged_events,
      summary: RunSummary {
        mode,
        frames_processed: 0,
        frames_failed: 0,
        detections_total: 0,
        alert_total: 0,
        alert_counts: BTreeMap::new(),
        sample_detections: Vec::new(),
        alert_events: Vec::new(),
      },
    }
  }

  pub fn record(&mut self, frame_index: u64, evaluation: &Evaluation) {
    let summary = &mut self.summary;
    summary.frames_processed += 1;
    summary.detections_total += evaluation.detections.len() as u64;
    summary.alert_total += evaluation.events.len() as u64;

    for event in &evaluation.events {
      *summary.alert_counts.entry(event.reason).or_default() += 1;
    }

    if !evaluation.detections.is_empty() && summary.sample_detections.len() < self.max_logged_events {
      summary.sample_detections.push(FrameSample {
        frame_index,
        items: evaluation.detections.clone(),
      });
    }

    let room = self.max_logged_events.saturating_sub(summary.alert_events.len());
    summary
      .alert_events
      .extend(evaluation.events.iter().take(room).cloned());
  }

  /// 记录一个被跳过的帧
  pub fn record_failure(&mut self) {
    self.summary.frames_failed += 1;
  }

  pub fn summary(&self) -> &RunSummary {
    &self.summary
  }

  pub fn finish(self) -> RunSummary {
    self.summary
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BBox, Detection};
  use crate::policy::PolicyFlag;

  fn alerting(frame_index: u64, events: usize) -> Evaluation {
    let detection = Detection::new("knife", 0.7, BBox::new(0, 0, 4, 4)).unwrap();
    Evaluation {
      detections: vec![
        FlaggedDetection {
          detection: detection.clone(),
          flag: PolicyFlag::Weapon,
        };
        events
      ],
      events: (0..events)
        .map(|_| AlertEvent {
          detection: detection.clone(),
          reason: AlertReason::WeaponMatch,
          frame_index,
          timestamp_ms: frame_index * 40,
          timestamp: "08:00:00".to_string(),
        })
        .collect(),
    }
  }

  #[test]
  fn counts_stay_exact_under_cap() {
    let mut aggregator = Aggregator::new(RunMode::Video, 2);
    for i in 0..5 {
      aggregator.record(i, &alerting(i, 1));
    }
    let summary = aggregator.finish();

    assert_eq!(summary.frames_processed, 5);
    assert_eq!(summary.alert_total, 5);
    assert_eq!(summary.alert_events.len(), 2);
    assert_eq!(summary.alert_events[0].frame_index, 0);
    assert_eq!(summary.alert_events[1].frame_index, 1);
    assert_eq!(summary.sample_detections.len(), 2);
    assert_eq!(summary.alert_counts[&AlertReason::WeaponMatch], 5);
  }

  #[test]
  fn cap_applies_per_event_within_a_frame() {
    let mut aggregator = Aggregator::new(RunMode::Video, 3);
    aggregator.record(0, &alerting(0, 2));
    aggregator.record(1, &alerting(1, 2));
    let summary = aggregator.finish();

    assert_eq!(summary.alert_total, 4);
    assert_eq!(summary.alert_events.len(), 3);
    assert_eq!(summary.alert_events[2].frame_index, 1);
  }

  #[test]
  fn empty_frames_are_counted_but_not_sampled() {
    let mut aggregator = Aggregator::new(RunMode::Image, 50);
    aggregator.record(0, &Evaluation::default());
    aggregator.record_failure();
    let summary = aggregator.finish();

    assert_eq!(summary.frames_processed, 1);
    assert_eq!(summary.frames_failed, 1);
    assert!(summary.sample_detections.is_empty());
  }

  #[test]
  fn summary_is_plain_json() {
    let mut aggregator = Aggregator::new(RunMode::Video, 50);
    aggregator.record(4, &alerting(4, 1));
    let value = serde_json::to_value(aggregator.finish()).unwrap();

    assert_eq!(value["mode"], "video");
    assert_eq!(value["alert_counts"]["weapon_match"], 1);
    assert_eq!(value["sample_detections"][0]["frame_index"], 4);
    assert_eq!(value["sample_detections"][0]["items"][0]["confidence"], 0.7);
    assert_eq!(value["alert_events"][0]["reason"], "weapon_match");
  }
}
