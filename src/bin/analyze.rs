// 该文件是 Shaowang （哨望） 项目的一部分。
// src/bin/analyze.rs - 单次分析命令行
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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use shaowang::{
  FromUrl,
  config::{PolicyName, RunConfig},
  input::{InputWrapper, Interruptible},
  model::{EmbeddingModel, Model, ReplayModelBuilder, ThumbnailEmbedder},
  output::{Draw, OutputWrapper, Render},
  registry::RegistryCache,
  task::{Pipeline, RunMode},
};

/// 哨望：对图片或视频运行一种检测策略，输出标注结果与运行统计
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测策略
  #[arg(long, value_enum)]
  pub policy: Option<PolicyName>,
  /// 检测模型，例如 replay:///data/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  /// 输入来源，例如 image:///a.jpg、video:///a.mp4、frames:///dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注结果输出，例如 image:///out.png、video:///out.mp4、y4m:///out.y4m、folder:///dir
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 运行统计 JSON 的保存路径，省略时打印到标准输出
  #[arg(long, value_name = "FILE")]
  pub summary: Option<PathBuf>,
  /// 运行模式，省略时按输入方案推断
  #[arg(long, value_enum)]
  pub mode: Option<RunMode>,
  /// 配置文件，省略时读取环境变量 SHAOWANG_CONFIG
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 参考人脸目录
  #[arg(long, value_name = "DIR", conflicts_with = "registry")]
  pub known_faces: Option<PathBuf>,
  /// 已保存的身份库
  #[arg(long, value_name = "FILE")]
  pub registry: Option<PathBuf>,
  /// 标注文字使用的字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 最多处理的帧数
  #[arg(long, value_name = "N")]
  pub max_frames: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let mut config = RunConfig::discover(args.config.as_deref()).context("加载配置失败")?;
  if let Some(dir) = &args.known_faces {
    config.face.known_faces = Some(dir.clone());
    config.face.registry = None;
  }
  if let Some(path) = &args.registry {
    config.face.registry = Some(path.clone());
  }

  let policy_name = args
    .policy
    .or(config.policy)
    .ok_or_else(|| anyhow!("需要通过 --policy 或配置文件指定检测策略"))?;
  let model_url = match (&args.model, &config.model) {
    (Some(url), _) => url.clone(),
    (None, Some(url)) => Url::parse(url).with_context(|| format!("无效的模型地址 {}", url))?,
    (None, None) => return Err(anyhow!("需要通过 --model 或配置文件指定检测模型")),
  };

  info!("检测策略: {:?}", policy_name);
  info!("模型: {}", model_url);
  info!("输入来源: {}", args.input);

  let embedder = ThumbnailEmbedder::default();
  let policy = config
    .build_policy(policy_name, &RegistryCache::new(), &embedder)
    .context("构建检测策略失败")?;

  let mut builder = ReplayModelBuilder::from_url(&model_url)?;
  if !model_url.query_pairs().any(|(k, _)| k == "confidence") {
    builder = builder.confidence(config.confidence_for(policy_name));
  }
  let detector = builder.build().context("加载模型失败")?;
  let model: Box<dyn Model> = match policy_name {
    PolicyName::Face => Box::new(EmbeddingModel::new(detector, embedder)),
    _ => Box::new(detector),
  };

  let draw = match args.font.as_ref().or(config.font.as_ref()) {
    Some(path) => Draw::with_font_file(path).with_context(|| format!("加载字体 {} 失败", path.display()))?,
    None => Draw::default(),
  };

  let input = InputWrapper::from_url(&args.input).context("打开输入失败")?;
  let mode = args.mode.unwrap_or(if input.is_still_image() {
    RunMode::Image
  } else {
    RunMode::Video
  });

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，处理完当前帧后停止");
      stop.store(true, Ordering::SeqCst);
    })
    .context("设置中断处理失败")?;
  }
  let source = Interruptible::new(input, stop).with_limit(args.max_frames);

  let mut output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()
    .context("打开输出失败")?;

  let pipeline = Pipeline::new(model, policy)
    .with_draw(draw)
    .with_options(config.run_options()?);
  let summary = pipeline.run(mode, source, output.as_mut().map(|o| o as &mut dyn Render))?;

  let json = summary.to_json()?;
  match &args.summary {
    Some(path) => {
      std::fs::write(path, json).with_context(|| format!("写入运行统计 {} 失败", path.display()))?;
      info!("运行统计已保存到: {}", path.display());
    }
    None => println!("{}", json),
  }

  Ok(())
}
