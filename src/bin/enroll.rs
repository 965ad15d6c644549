// 该文件是 Shaowang （哨望） 项目的一部分。
// src/bin/enroll.rs - 人脸身份库注册
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shaowang::{model::ThumbnailEmbedder, registry::FaceRegistry};

/// 从参考人脸目录生成身份库文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 参考人脸目录，每张图片的文件名即身份名
  #[arg(long, value_name = "DIR")]
  pub known_faces: PathBuf,
  /// 身份库输出路径
  #[arg(long, value_name = "FILE")]
  pub output: PathBuf,
  /// 没有任何身份注册成功时返回错误
  #[arg(long)]
  pub strict: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  info!("参考人脸目录: {}", args.known_faces.display());

  let (registry, warnings) = FaceRegistry::enroll_directory(&args.known_faces, &ThumbnailEmbedder::default());
  if args.strict && registry.is_empty() {
    bail!(
      "{} 中没有可注册的人脸 ({} 条警告)",
      args.known_faces.display(),
      warnings.len()
    );
  }

  registry
    .save_json(&args.output)
    .with_context(|| format!("保存身份库 {} 失败", args.output.display()))?;
  info!(
    "身份库已保存到: {} ({} 个身份, 跳过 {} 个文件)",
    args.output.display(),
    registry.len(),
    warnings.len()
  );

  Ok(())
}
