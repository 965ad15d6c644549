// 该文件是 Shaowang （哨望） 项目的一部分。
// src/policy/keyword.rs - 武器关键词策略
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

use crate::{
  model::Detection,
  policy::{AlertReason, Policy, PolicyFlag, Verdict},
};

pub const DEFAULT_KEYWORDS: &[&str] = &["weapon", "gun", "pistol", "knife", "rifle", "shotgun"];
pub const DEFAULT_KEYWORD_CONFIDENCE: f32 = 0.3;

/// 标签（忽略大小写）包含任一关键词即命中
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
  keywords: Vec<String>,
}

impl Default for KeywordPolicy {
  fn default() -> Self {
    Self::new(DEFAULT_KEYWORDS.iter().copied())
  }
}

impl KeywordPolicy {
  pub fn new<I, S>(keywords: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      keywords: keywords
        .into_iter()
        .map(|k| k.as_ref().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect(),
    }
  }

  pub fn matches(&self, label: &str) -> bool {
    let label = label.to_lowercase();
    self.keywords.iter().any(|k| label.contains(k.as_str()))
  }
}

impl Policy for KeywordPolicy {
  fn judge(&self, detection: Detection) -> Verdict {
    if self.matches(detection.label()) {
      Verdict {
        detection,
        flag: PolicyFlag::Weapon,
        reason: Some(AlertReason::WeaponMatch),
      }
    } else {
      Verdict::benign(detection)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn substring_match_ignores_case() {
    let policy = KeywordPolicy::default();
    assert!(policy.matches("Pistol_v2"));
    assert!(policy.matches("HANDGUN"));
    assert!(!policy.matches("person"));
  }

  #[test]
  fn keywords_are_lowercased() {
    let policy = KeywordPolicy::new(["Machete", ""]);
    assert!(policy.matches("machete"));
    assert!(!policy.matches("anything"));
  }
}
