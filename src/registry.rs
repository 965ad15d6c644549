// 该文件是 Shaowang （哨望） 项目的一部分。
// src/registry.rs - 人脸身份库
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

//! 人脸身份库
//!
//! 参考目录中每个身份一张图片，文件名（不含扩展名）即身份名。
//! 读取失败或找不到人脸的图片只会产生 [`RegistrationWarning`]，不会中断注册。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::FaceEmbedder;

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("身份库文件格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("{name} 的特征维度为 {actual}, 身份库要求 {expected}")]
  DimensionMismatch {
    name: String,
    expected: usize,
    actual: usize,
  },
  #[error("身份库缓存锁已损坏")]
  LockPoisoned,
}

/// 注册单个身份失败，不影响其余身份
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationWarning {
  pub path: PathBuf,
  pub reason: String,
}

impl fmt::Display for RegistrationWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.path.display(), self.reason)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceIdentityRecord {
  pub name: String,
  pub embedding: Vec<f32>,
}

/// 与探测特征最接近的身份
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityMatch<'a> {
  pub name: &'a str,
  pub distance: f32,
}

/// 每个名字只保留一个特征，重复注册会覆盖旧值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceRegistry {
  records: BTreeMap<String, Vec<f32>>,
}

impl FaceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册身份，返回被覆盖的旧特征
  pub fn register(
    &mut self,
    name: impl Into<String>,
    embedding: Vec<f32>,
  ) -> Result<Option<Vec<f32>>, RegistryError> {
    let name = name.into();
    if let Some(expected) = self.dimension()
      && expected != embedding.len()
      && !(self.records.len() == 1 && self.records.contains_key(&name))
    {
      return Err(RegistryError::DimensionMismatch {
        name,
        expected,
        actual: embedding.len(),
      });
    }
    Ok(self.records.insert(name, embedding))
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// 特征维度，空库为 `None`
  pub fn dimension(&self) -> Option<usize> {
    self.records.values().next().map(Vec::len)
  }

  pub fn get(&self, name: &str) -> Option<&[f32]> {
    self.records.get(name).map(Vec::as_slice)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.records.keys().map(String::as_str)
  }

  pub fn records(&self) -> impl Iterator<Item = FaceIdentityRecord> + '_ {
    self.records.iter().map(|(name, embedding)| FaceIdentityRecord {
      name: name.clone(),
      embedding: embedding.clone(),
    })
  }

  /// 欧氏距离最小的身份；空库或维度不符时返回 `None`
  pub fn nearest(&self, probe: &[f32]) -> Option<IdentityMatch<'_>> {
    let mut best: Option<IdentityMatch<'_>> = None;
    for (name, embedding) in &self.records {
      if embedding.len() != probe.len() {
        continue;
      }
      let distance = euclidean(probe, embedding);
      if best.is_none_or(|b| distance < b.distance) {
        best = Some(IdentityMatch { name, distance });
      }
    }
    best
  }

  /// 从参考目录注册身份
  ///
  /// 目录不存在时返回空库和一条警告。
  pub fn enroll_directory<E: FaceEmbedder>(
    dir: &Path,
    embedder: &E,
  ) -> (Self, Vec<RegistrationWarning>) {
    let mut registry = Self::new();
    let mut warnings = Vec::new();

    let entries = match std::fs::read_dir(dir) {
      Ok(entries) => entries,
      Err(e) => {
        warn!("人脸参考目录 {} 不可读: {}", dir.display(), e);
        warnings.push(RegistrationWarning {
          path: dir.to_path_buf(),
          reason: format!("目录不可读: {}", e),
        });
        return (registry, warnings);
      }
    };

    let mut paths: Vec<PathBuf> = entries
      .filter_map(Result::ok)
      .map(|entry| entry.path())
      .filter(|path| path.is_file())
      .collect();
    paths.sort();

    for path in paths {
      match registry.enroll_file(&path, embedder) {
        Ok(name) => info!("已注册身份 {}", name),
        Err(reason) => {
          let warning = RegistrationWarning { path, reason };
          warn!("跳过人脸参考图片 {}", warning);
          warnings.push(warning);
        }
      }
    }

    info!(
      "人脸身份库注册完成: {} 个身份, {} 条警告",
      registry.len(),
      warnings.len()
    );
    (registry, warnings)
  }

  fn enroll_file<E: FaceEmbedder>(&mut self, path: &Path, embedder: &E) -> Result<String, String> {
    let name = path
      .file_stem()
      .and_then(|s| s.to_str())
      .filter(|s| !s.is_empty())
      .ok_or_else(|| "文件名无法作为身份名".to_string())?
      .to_string();

    let image = image::open(path)
      .map_err(|e| format!("无法读取图片: {}", e))?
      .to_rgb8();

    let embedding = embedder
      .embed(&image)
      .map_err(|e| format!("特征提取失败: {}", e))?
      .ok_or_else(|| "图片中没有找到人脸".to_string())?;

    if self.register(name.clone(), embedding).map_err(|e| e.to_string())?.is_some() {
      warn!("身份 {} 被重复注册，已覆盖旧特征", name);
    }
    Ok(name)
  }

  pub fn save_json(&self, path: &Path) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let records: Vec<FaceIdentityRecord> = self.records().collect();
    std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
    Ok(())
  }

  pub fn load_json(path: &Path) -> Result<Self, RegistryError> {
    let records: Vec<FaceIdentityRecord> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut registry = Self::new();
    for record in records {
      registry.register(record.name, record.embedding)?;
    }
    Ok(registry)
  }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
  a.iter()
    .zip(b)
    .map(|(x, y)| (x - y) * (x - y))
    .sum::<f32>()
    .sqrt()
}

/// 按参考目录缓存身份库
///
/// 同一目录只注册一次；需要重新注册时先调用 [`RegistryCache::invalidate`]。
#[derive(Default)]
pub struct RegistryCache {
  entries: Mutex<HashMap<PathBuf, Arc<FaceRegistry>>>,
}

impl RegistryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_or_enroll<E: FaceEmbedder>(
    &self,
    dir: &Path,
    embedder: &E,
  ) -> Result<Arc<FaceRegistry>, RegistryError> {
    let key = cache_key(dir);
    let mut entries = self.entries.lock().map_err(|_| RegistryError::LockPoisoned)?;
    if let Some(registry) = entries.get(&key) {
      return Ok(registry.clone());
    }

    let (registry, _warnings) = FaceRegistry::enroll_directory(dir, embedder);
    let registry = Arc::new(registry);
    entries.insert(key, registry.clone());
    Ok(registry)
  }

  /// 移除缓存项，返回是否存在
  pub fn invalidate(&self, dir: &Path) -> Result<bool, RegistryError> {
    let mut entries = self.entries.lock().map_err(|_| RegistryError::LockPoisoned)?;
    Ok(entries.remove(&cache_key(dir)).is_some())
  }
}

fn cache_key(dir: &Path) -> PathBuf {
  dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reregistering_overwrites() {
    let mut registry = FaceRegistry::new();
    assert_eq!(registry.register("alice", vec![0.0, 0.0]).unwrap(), None);
    assert_eq!(
      registry.register("alice", vec![1.0, 1.0]).unwrap(),
      Some(vec![0.0, 0.0])
    );
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("alice"), Some(&[1.0, 1.0][..]));
  }

  #[test]
  fn dimension_must_agree() {
    let mut registry = FaceRegistry::new();
    registry.register("alice", vec![0.0, 0.0]).unwrap();
    assert!(matches!(
      registry.register("bob", vec![0.0, 0.0, 0.0]),
      Err(RegistryError::DimensionMismatch { expected: 2, actual: 3, .. })
    ));
  }

  #[test]
  fn nearest_picks_minimum_distance() {
    let mut registry = FaceRegistry::new();
    registry.register("alice", vec![0.0, 0.0]).unwrap();
    registry.register("bob", vec![3.0, 4.0]).unwrap();

    let hit = registry.nearest(&[2.9, 4.0]).unwrap();
    assert_eq!(hit.name, "bob");
    assert!((hit.distance - 0.1).abs() < 1e-5);

    assert_eq!(registry.nearest(&[1.0]), None);
    assert_eq!(FaceRegistry::new().nearest(&[1.0, 2.0]), None);
  }
}
