// 该文件是 Shaowang （哨望） 项目的一部分。
// src/policy/identity.rs - 人脸身份授权策略
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

use std::sync::Arc;

use crate::{
  model::Detection,
  policy::{AlertReason, Policy, PolicyFlag, Verdict},
  registry::FaceRegistry,
};

pub const DEFAULT_IDENTITY_THRESHOLD: f32 = 0.9;
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// 与最近身份的距离严格小于阈值即授权
///
/// 授权与拒绝都会产生事件；没有人脸特征的检测结果标记为未验证，不产生事件。
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
  registry: Arc<FaceRegistry>,
  threshold: f32,
}

impl IdentityPolicy {
  pub fn new(registry: Arc<FaceRegistry>, threshold: f32) -> Self {
    Self { registry, threshold }
  }

  pub fn with_default_threshold(registry: Arc<FaceRegistry>) -> Self {
    Self::new(registry, DEFAULT_IDENTITY_THRESHOLD)
  }

  pub fn registry(&self) -> &FaceRegistry {
    &self.registry
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }
}

impl Policy for IdentityPolicy {
  fn judge(&self, detection: Detection) -> Verdict {
    let Some(embedding) = detection.embedding() else {
      return Verdict {
        detection,
        flag: PolicyFlag::Unverified,
        reason: None,
      };
    };

    match self.registry.nearest(embedding) {
      Some(hit) if hit.distance < self.threshold => Verdict {
        detection: detection.relabeled(hit.name),
        flag: PolicyFlag::Authorized {
          name: hit.name.to_string(),
          distance: hit.distance,
        },
        reason: Some(AlertReason::IdentityGranted),
      },
      hit => Verdict {
        detection: detection.relabeled(UNKNOWN_IDENTITY),
        flag: PolicyFlag::Denied {
          distance: hit.map(|h| h.distance),
        },
        reason: Some(AlertReason::IdentityDenied),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn face(embedding: Vec<f32>) -> Detection {
    Detection::new("face", 0.99, BBox::new(0, 0, 10, 10))
      .unwrap()
      .with_embedding(embedding)
  }

  fn alice_registry() -> Arc<FaceRegistry> {
    let mut registry = FaceRegistry::new();
    registry.register("alice", vec![0.0, 0.0]).unwrap();
    Arc::new(registry)
  }

  #[test]
  fn close_match_is_granted() {
    let policy = IdentityPolicy::new(alice_registry(), 0.9);
    let verdict = policy.judge(face(vec![0.3, 0.0]));

    assert_eq!(verdict.detection.label(), "alice");
    assert_eq!(verdict.reason, Some(AlertReason::IdentityGranted));
    assert!(matches!(verdict.flag, PolicyFlag::Authorized { ref name, .. } if name == "alice"));
  }

  #[test]
  fn distant_match_is_denied() {
    let policy = IdentityPolicy::new(alice_registry(), 0.2);
    let verdict = policy.judge(face(vec![0.3, 0.0]));

    assert_eq!(verdict.detection.label(), "Unknown");
    assert_eq!(verdict.reason, Some(AlertReason::IdentityDenied));
    match verdict.flag {
      PolicyFlag::Denied { distance: Some(d) } => assert!((d - 0.3).abs() < 1e-6),
      other => panic!("unexpected flag {other:?}"),
    }
  }

  #[test]
  fn threshold_is_strict() {
    let policy = IdentityPolicy::new(alice_registry(), 0.5);
    let verdict = policy.judge(face(vec![0.5, 0.0]));
    assert_eq!(verdict.reason, Some(AlertReason::IdentityDenied));
  }

  #[test]
  fn empty_registry_resolves_unknown() {
    let policy = IdentityPolicy::with_default_threshold(Arc::new(FaceRegistry::new()));
    let verdict = policy.judge(face(vec![0.1, 0.2]));

    assert_eq!(verdict.detection.label(), "Unknown");
    assert_eq!(verdict.flag, PolicyFlag::Denied { distance: None });
    assert_eq!(verdict.reason, Some(AlertReason::IdentityDenied));
  }

  #[test]
  fn missing_embedding_is_unverified() {
    let policy = IdentityPolicy::new(alice_registry(), 0.9);
    let detection = Detection::new("face", 0.99, BBox::new(0, 0, 10, 10)).unwrap();
    let verdict = policy.judge(detection);

    assert_eq!(verdict.flag, PolicyFlag::Unverified);
    assert_eq!(verdict.reason, None);
    assert_eq!(verdict.detection.label(), "face");
  }
}
