// 该文件是 Shaowang （哨望） 项目的一部分。
// src/config.rs - 运行配置
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

//! TOML 运行配置
//!
//! 所有字段都可以省略，省略时使用内置默认值；命令行参数覆盖文件中的值。
//! 未指定 `--config` 时读取环境变量 `SHAOWANG_CONFIG` 指向的文件。
//!
//! ```toml
//! policy = "zone"
//! model = "replay:///data/detections.json"
//! confidence = 0.4
//! max_logged_events = 50
//! on_failure = "skip"
//! max_consecutive_failures = 3
//!
//! [zone]
//! area = [150, 150, 400, 350]
//! labels = ["person", "car"]
//!
//! [weapon]
//! keywords = ["knife", "gun"]
//!
//! [face]
//! threshold = 0.9
//! known_faces = "known_faces"
//!
//! [human]
//! labels = ["person", "human"]
//!
//! [annotate]
//! confidence = 0.25
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  model::{BBox, FaceEmbedder},
  policy::{
    AnnotatePolicy, DEFAULT_ANNOTATE_CONFIDENCE, DEFAULT_IDENTITY_THRESHOLD, DEFAULT_KEYWORD_CONFIDENCE,
    DEFAULT_KEYWORDS, DEFAULT_LABEL_SET, DEFAULT_LABEL_SET_CONFIDENCE, DEFAULT_ZONE_AREA, DEFAULT_ZONE_CONFIDENCE,
    DEFAULT_ZONE_LABELS, IdentityPolicy, KeywordPolicy, LabelSetPolicy, PolicyKind, ZonePolicy,
  },
  registry::{FaceRegistry, RegistryCache, RegistryError},
  summary::DEFAULT_MAX_LOGGED_EVENTS,
  task::{FailurePolicy, RunOptions},
};

pub const CONFIG_ENV: &str = "SHAOWANG_CONFIG";
pub const DEFAULT_IDENTITY_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_KNOWN_FACES_DIR: &str = "known_faces";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件 {} 不存在", path.display())]
  NotFound { path: PathBuf },
  #[error("读取配置文件 {} 失败: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析配置 {origin} 失败: {source}")]
  Parse {
    origin: String,
    #[source]
    source: toml::de::Error,
  },
  #[error("配置项 '{field}' 的值 '{value}' 无效")]
  InvalidValue { field: &'static str, value: String },
  #[error("身份库错误: {0}")]
  Registry(#[from] RegistryError),
}

impl ConfigError {
  fn invalid(field: &'static str, value: impl ToString) -> Self {
    ConfigError::InvalidValue {
      field,
      value: value.to_string(),
    }
  }
}

/// 可选的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
  Zone,
  Weapon,
  Face,
  /// 标签精确命中关注集合时告警
  Human,
  /// 只标注，不告警
  Annotate,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
  pub policy: Option<PolicyName>,
  pub model: Option<String>,
  /// 所有策略共用的置信度下限，可被各策略小节覆盖
  pub confidence: Option<f32>,
  pub max_logged_events: Option<usize>,
  /// `abort` 或 `skip`
  pub on_failure: Option<String>,
  pub max_consecutive_failures: Option<u32>,
  pub font: Option<PathBuf>,
  pub zone: ZoneConfig,
  pub weapon: KeywordConfig,
  pub face: IdentityConfig,
  pub human: LabelSetConfig,
  pub annotate: AnnotateConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneConfig {
  pub area: Option<[i32; 4]>,
  pub labels: Option<Vec<String>>,
  pub confidence: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeywordConfig {
  pub keywords: Option<Vec<String>>,
  pub confidence: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
  pub threshold: Option<f32>,
  /// 参考人脸目录，每张图片的文件名即身份名
  pub known_faces: Option<PathBuf>,
  /// 由 `shaowang-enroll` 生成的身份库文件，优先于 `known_faces`
  pub registry: Option<PathBuf>,
  pub confidence: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabelSetConfig {
  pub labels: Option<Vec<String>>,
  pub confidence: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnnotateConfig {
  pub confidence: Option<f32>,
}

impl std::str::FromStr for RunConfig {
  type Err = ConfigError;

  fn from_str(contents: &str) -> Result<Self, Self::Err> {
    parse(contents, "<inline>")
  }
}

fn parse(contents: &str, origin: &str) -> Result<RunConfig, ConfigError> {
  let config: RunConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
    origin: origin.to_string(),
    source,
  })?;
  config.validate()?;
  Ok(config)
}

impl RunConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound {
        path: path.to_path_buf(),
      });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = parse(&contents, &path.display().to_string())?;
    info!("已加载配置文件: {}", path.display());
    Ok(config)
  }

  /// 显式路径优先，其次是环境变量，都没有时使用默认配置
  pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::load(path);
    }
    match std::env::var_os(CONFIG_ENV) {
      Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
      _ => Ok(Self::default()),
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let confidences = [
      ("confidence", self.confidence),
      ("zone.confidence", self.zone.confidence),
      ("weapon.confidence", self.weapon.confidence),
      ("face.confidence", self.face.confidence),
      ("human.confidence", self.human.confidence),
      ("annotate.confidence", self.annotate.confidence),
    ];
    for (field, value) in confidences {
      if let Some(value) = value
        && !(0.0..=1.0).contains(&value)
      {
        return Err(ConfigError::invalid(field, value));
      }
    }

    if let Some(threshold) = self.face.threshold
      && !(threshold.is_finite() && threshold > 0.0)
    {
      return Err(ConfigError::invalid("face.threshold", threshold));
    }

    if let Some([x1, y1, x2, y2]) = self.zone.area
      && (x1 > x2 || y1 > y2)
    {
      return Err(ConfigError::invalid("zone.area", format!("[{x1}, {y1}, {x2}, {y2}]")));
    }

    if let Some(labels) = &self.zone.labels
      && labels.is_empty()
    {
      return Err(ConfigError::invalid("zone.labels", "[]"));
    }
    if let Some(keywords) = &self.weapon.keywords
      && keywords.iter().all(|k| k.trim().is_empty())
    {
      return Err(ConfigError::invalid("weapon.keywords", format!("{:?}", keywords)));
    }
    if let Some(labels) = &self.human.labels
      && labels.iter().all(|l| l.trim().is_empty())
    {
      return Err(ConfigError::invalid("human.labels", format!("{:?}", labels)));
    }

    self.failure_policy()?;
    Ok(())
  }

  pub fn failure_policy(&self) -> Result<FailurePolicy, ConfigError> {
    let mode = self.on_failure.as_deref().unwrap_or("abort");
    match (mode, self.max_consecutive_failures) {
      ("abort", None) => Ok(FailurePolicy::Abort),
      ("abort", Some(n)) => Err(ConfigError::invalid(
        "max_consecutive_failures",
        format!("{} (on_failure = \"abort\")", n),
      )),
      ("skip", None) => Ok(FailurePolicy::SkipAndCount),
      ("skip", Some(n)) => Ok(FailurePolicy::SkipConsecutive(n)),
      (other, _) => Err(ConfigError::invalid("on_failure", other)),
    }
  }

  pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
    Ok(RunOptions {
      max_logged_events: self.max_logged_events.unwrap_or(DEFAULT_MAX_LOGGED_EVENTS),
      failure_policy: self.failure_policy()?,
    })
  }

  /// 策略小节 > 全局 > 该策略的默认值
  pub fn confidence_for(&self, policy: PolicyName) -> f32 {
    let (specific, default) = match policy {
      PolicyName::Zone => (self.zone.confidence, DEFAULT_ZONE_CONFIDENCE),
      PolicyName::Weapon => (self.weapon.confidence, DEFAULT_KEYWORD_CONFIDENCE),
      PolicyName::Face => (self.face.confidence, DEFAULT_IDENTITY_CONFIDENCE),
      PolicyName::Human => (self.human.confidence, DEFAULT_LABEL_SET_CONFIDENCE),
      PolicyName::Annotate => (self.annotate.confidence, DEFAULT_ANNOTATE_CONFIDENCE),
    };
    specific.or(self.confidence).unwrap_or(default)
  }

  pub fn zone_policy(&self) -> ZonePolicy {
    let area = self.zone.area.map(BBox::from).unwrap_or(DEFAULT_ZONE_AREA);
    match &self.zone.labels {
      Some(labels) => ZonePolicy::new(labels.iter().cloned(), area),
      None => ZonePolicy::new(DEFAULT_ZONE_LABELS.iter().copied(), area),
    }
  }

  pub fn keyword_policy(&self) -> KeywordPolicy {
    match &self.weapon.keywords {
      Some(keywords) => KeywordPolicy::new(keywords),
      None => KeywordPolicy::new(DEFAULT_KEYWORDS),
    }
  }

  pub fn label_set_policy(&self) -> LabelSetPolicy {
    match &self.human.labels {
      Some(labels) => LabelSetPolicy::new(labels),
      None => LabelSetPolicy::new(DEFAULT_LABEL_SET),
    }
  }

  pub fn identity_threshold(&self) -> f32 {
    self.face.threshold.unwrap_or(DEFAULT_IDENTITY_THRESHOLD)
  }

  /// 载入身份库：优先读取持久化文件，否则注册参考目录（经由缓存）
  pub fn identity_registry<E: FaceEmbedder>(
    &self,
    cache: &RegistryCache,
    embedder: &E,
  ) -> Result<Arc<FaceRegistry>, ConfigError> {
    if let Some(path) = &self.face.registry {
      let registry = FaceRegistry::load_json(path)?;
      info!("已载入身份库 {}: {} 个身份", path.display(), registry.len());
      return Ok(Arc::new(registry));
    }

    let dir = self
      .face
      .known_faces
      .clone()
      .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWN_FACES_DIR));
    let registry = cache.get_or_enroll(&dir, embedder)?;
    if registry.is_empty() {
      warn!("身份库为空，所有人脸都将被判定为 Unknown");
    }
    Ok(registry)
  }

  pub fn build_policy<E: FaceEmbedder>(
    &self,
    policy: PolicyName,
    cache: &RegistryCache,
    embedder: &E,
  ) -> Result<PolicyKind, ConfigError> {
    Ok(match policy {
      PolicyName::Zone => self.zone_policy().into(),
      PolicyName::Weapon => self.keyword_policy().into(),
      PolicyName::Face => {
        let registry = self.identity_registry(cache, embedder)?;
        IdentityPolicy::new(registry, self.identity_threshold()).into()
      }
      PolicyName::Human => self.label_set_policy().into(),
      PolicyName::Annotate => AnnotatePolicy.into(),
    })
  }
}
