// 该文件是 Shaowang （哨望） 项目的一部分。
// src/policy/label_set.rs - 标签集合策略与纯标注策略
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

use std::collections::BTreeSet;

use crate::{
  model::Detection,
  policy::{AlertReason, Policy, PolicyFlag, Verdict},
};

pub const DEFAULT_LABEL_SET: &[&str] = &["person", "human"];
pub const DEFAULT_LABEL_SET_CONFIDENCE: f32 = 0.6;
pub const DEFAULT_ANNOTATE_CONFIDENCE: f32 = 0.25;

/// 标签（忽略大小写）与集合中某一项完全相同即命中
///
/// 与 [`KeywordPolicy`](super::KeywordPolicy) 不同，`superhuman` 不会命中 `human`。
#[derive(Debug, Clone)]
pub struct LabelSetPolicy {
  labels: BTreeSet<String>,
}

impl Default for LabelSetPolicy {
  fn default() -> Self {
    Self::new(DEFAULT_LABEL_SET.iter().copied())
  }
}

impl LabelSetPolicy {
  pub fn new<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      labels: labels
        .into_iter()
        .map(|l| l.as_ref().trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect(),
    }
  }

  pub fn matches(&self, label: &str) -> bool {
    self.labels.contains(&label.trim().to_lowercase())
  }
}

impl Policy for LabelSetPolicy {
  fn judge(&self, detection: Detection) -> Verdict {
    if self.matches(detection.label()) {
      Verdict {
        detection,
        flag: PolicyFlag::Sighted,
        reason: Some(AlertReason::LabelMatch),
      }
    } else {
      Verdict::benign(detection)
    }
  }
}

/// 只标注、不告警
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotatePolicy;

impl Policy for AnnotatePolicy {
  fn judge(&self, detection: Detection) -> Verdict {
    Verdict::benign(detection)
  }
}
