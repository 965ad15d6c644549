// 该文件是 Shaowang （哨望） 项目的一部分。
// tests/registry.rs - 人脸身份库测试
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
use std::sync::Arc;

use image::{Rgb, RgbImage};

use shaowang::{
  input::FrameSequence,
  model::{EmbeddingModel, FaceEmbedder, ReplayModel, ThumbnailEmbedder},
  policy::{AlertReason, IdentityPolicy, PolicyFlag},
  registry::{FaceRegistry, RegistryCache},
  task::{Pipeline, RunMode},
};

fn horizontal(width: u32, height: u32) -> RgbImage {
  RgbImage::from_fn(width, height, |x, _| {
    let v = (x * 255 / width.max(1)) as u8;
    Rgb([v, v, v])
  })
}

fn vertical(width: u32, height: u32) -> RgbImage {
  RgbImage::from_fn(width, height, |_, y| {
    let v = (y * 255 / height.max(1)) as u8;
    Rgb([v, v, v])
  })
}

fn write_reference_dir(dir: &Path) {
  horizontal(32, 32).save(dir.join("alice.png")).unwrap();
  vertical(32, 32).save(dir.join("bob.png")).unwrap();
  RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]))
    .save(dir.join("blank.png"))
    .unwrap();
  std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
  std::fs::create_dir(dir.join("nested")).unwrap();
}

#[test]
fn enrollment_skips_unusable_files() {
  let dir = tempfile::tempdir().unwrap();
  write_reference_dir(dir.path());

  let (registry, warnings) = FaceRegistry::enroll_directory(dir.path(), &ThumbnailEmbedder::default());

  assert_eq!(registry.names().collect::<Vec<_>>(), vec!["alice", "bob"]);
  assert_eq!(warnings.len(), 2);
  assert!(warnings.iter().any(|w| w.path.ends_with("blank.png")));
  assert!(warnings.iter().any(|w| w.path.ends_with("notes.txt")));
}

#[test]
fn missing_directory_gives_empty_registry() {
  let dir = tempfile::tempdir().unwrap();
  let (registry, warnings) =
    FaceRegistry::enroll_directory(&dir.path().join("absent"), &ThumbnailEmbedder::default());
  assert!(registry.is_empty());
  assert_eq!(warnings.len(), 1);
}

#[test]
fn persisted_registry_matches_enrolled_one() {
  let dir = tempfile::tempdir().unwrap();
  write_reference_dir(dir.path());
  let embedder = ThumbnailEmbedder::default();
  let (registry, _) = FaceRegistry::enroll_directory(dir.path(), &embedder);

  let path = dir.path().join("out").join("registry.json");
  registry.save_json(&path).unwrap();
  let loaded = FaceRegistry::load_json(&path).unwrap();

  assert_eq!(loaded, registry);
  let probe = embedder.embed(&horizontal(48, 48)).unwrap().unwrap();
  assert_eq!(loaded.nearest(&probe).unwrap().name, "alice");
}

#[test]
fn cache_reuses_until_invalidated() {
  let dir = tempfile::tempdir().unwrap();
  write_reference_dir(dir.path());
  let embedder = ThumbnailEmbedder::default();
  let cache = RegistryCache::new();

  let first = cache.get_or_enroll(dir.path(), &embedder).unwrap();
  horizontal(16, 16).save(dir.path().join("carol.png")).unwrap();
  let second = cache.get_or_enroll(dir.path(), &embedder).unwrap();
  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(second.len(), 2);

  assert!(cache.invalidate(dir.path()).unwrap());
  let third = cache.get_or_enroll(dir.path(), &embedder).unwrap();
  assert_eq!(third.len(), 3);
  assert!(!cache.invalidate(&dir.path().join("elsewhere")).unwrap());
}

#[test]
fn face_run_grants_known_and_denies_strangers() {
  let dir = tempfile::tempdir().unwrap();
  write_reference_dir(dir.path());
  let embedder = ThumbnailEmbedder::default();
  let (registry, _) = FaceRegistry::enroll_directory(dir.path(), &embedder);

  // 左半边是 alice 的参考图，右半边是一块与任何参考图都不像的棋盘
  let mut frame = RgbImage::new(64, 32);
  image::imageops::replace(&mut frame, &horizontal(32, 32), 0, 0);
  let checker = RgbImage::from_fn(32, 32, |x, y| {
    if (x / 4 + y / 4) % 2 == 0 {
      Rgb([255, 255, 255])
    } else {
      Rgb([0, 0, 0])
    }
  });
  image::imageops::replace(&mut frame, &checker, 32, 0);

  let json = r#"[
    { "frame_index": 0, "detections": [
      { "label": "face", "confidence": 0.99, "bbox": [0, 0, 31, 31] },
      { "label": "face", "confidence": 0.97, "bbox": [32, 0, 63, 31] }
    ] }
  ]"#;
  let model = EmbeddingModel::new(ReplayModel::from_json_str(json, 0.5).unwrap(), embedder);
  let policy = IdentityPolicy::new(Arc::new(registry), 0.5);

  let summary = Pipeline::new(model, policy)
    .run(RunMode::Image, FrameSequence::new(vec![frame], None), None)
    .unwrap();

  assert_eq!(summary.alert_total, 2);
  assert_eq!(summary.alert_counts[&AlertReason::IdentityGranted], 1);
  assert_eq!(summary.alert_counts[&AlertReason::IdentityDenied], 1);

  let items = &summary.sample_detections[0].items;
  assert_eq!(items[0].detection.label(), "alice");
  assert!(matches!(items[0].flag, PolicyFlag::Authorized { .. }));
  assert_eq!(items[1].detection.label(), "Unknown");
  assert!(matches!(items[1].flag, PolicyFlag::Denied { distance: Some(_) }));
}

#[test]
fn detection_without_embedding_is_unverified() {
  let mut registry = FaceRegistry::new();
  registry.register("alice", vec![0.0; 4]).unwrap();
  let json = r#"[{ "frame_index": 0, "detections": [
    { "label": "face", "confidence": 0.9, "bbox": [0, 0, 8, 8] }
  ] }]"#;
  let model = ReplayModel::from_json_str(json, 0.5).unwrap();

  let summary = Pipeline::new(model, IdentityPolicy::with_default_threshold(Arc::new(registry)))
    .run(
      RunMode::Image,
      FrameSequence::new(vec![RgbImage::new(8, 8)], None),
      None,
    )
    .unwrap();

  assert_eq!(summary.alert_total, 0);
  assert_eq!(summary.detections_total, 1);
  assert!(matches!(
    summary.sample_detections[0].items[0].flag,
    PolicyFlag::Unverified
  ));
}
