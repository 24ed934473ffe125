//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 本地下载：`relaydown get <url>...`
//! - 批量下载：`relaydown get -f urls.txt`
//! - 下载服务：`relaydown serve --port 8765`
//! - 远程下载：`relaydown remote ws://host:8765 <url>...`
//! - 编辑配置：`relaydown -e`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/relaydown/relaydown.toml`
//! - macOS: `~/Library/Application Support/relaydown/relaydown.toml`
//! - Linux: `~/.config/relaydown/relaydown.toml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::utils::validator;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (构建于 ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")"
);

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/relaydown/relaydown.toml", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/relaydown/relaydown.toml", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/relaydown/relaydown.toml", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// relaydown 命令行参数
///
/// 示例用法：
///   relaydown get https://example.com/file.zip
///   relaydown serve --host 0.0.0.0 --port 8765
///   relaydown remote ws://192.168.1.2:8765 https://example.com/file.zip
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relaydown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION,
    about = "基于消息总线的可暂停/续传下载管理器",
    long_about = "每个下载由独立的工作线程执行，支持暂停、续传与取消。\n下载服务可以通过 WebSocket 桥接给远程前端使用。\n\n示例：\n  relaydown get https://example.com/file.zip\n  relaydown serve --port 8765\n  relaydown remote ws://127.0.0.1:8765 https://example.com/file.zip\n"
)]
pub struct Args {
    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, global = true, default_value_t = default_config_path())]
    pub config: String,

    /// 用系统默认编辑器打开配置文件并退出
    #[arg(short = 'e', long = "edit", global = true)]
    pub edit_config: bool,

    /// 指定下载目录，覆盖配置文件中的设置
    #[arg(short = 'd', long, global = true)]
    pub download_dir: Option<String>,

    /// 日志文件路径，覆盖配置文件中的设置
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// 日志级别（error/warn/info/debug/trace）
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// 在本进程内下载
    Get {
        /// 要下载的URL列表（可同时指定多个）
        urls: Vec<String>,
        /// 包含URL列表的文件路径，每行一个URL
        #[arg(short, long)]
        file: Option<String>,
    },
    /// 启动下载服务，等待远程前端通过 WebSocket 连接
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// 连接远程下载服务并下载
    Remote {
        /// 远程服务地址，例如 ws://127.0.0.1:8765
        uri: String,
        urls: Vec<String>,
        #[arg(short, long)]
        file: Option<String>,
    },
}

impl Args {
    /// 解析命令行参数并加载配置
    pub fn parse_args() -> Result<(Self, Config)> {
        let args = Args::parse();

        if args.edit_config {
            // 先确保文件存在
            Config::load(&args.config)?;
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let mut config = Config::load(&args.config)
            .with_context(|| format!("无法读取配置文件: {}", args.config))?;
        config.merge_from_args(&args);
        config.validate().context("配置无效")?;
        Ok((args, config))
    }

    /// `serve` 子命令里覆盖的监听地址
    pub fn listen_override(&self) -> (Option<String>, Option<u16>) {
        match &self.command {
            Some(Command::Serve { host, port }) => (host.clone(), *port),
            _ => (None, None),
        }
    }

    /// 收集命令行与 URL 文件中的 URL
    pub fn get_urls(&self) -> Result<Vec<String>> {
        let (urls, file) = match &self.command {
            Some(Command::Get { urls, file }) | Some(Command::Remote { urls, file, .. }) => {
                (urls, file)
            }
            _ => return Ok(Vec::new()),
        };
        let mut collected = urls.clone();

        if let Some(file_path) = file {
            if !Path::new(file_path).exists() {
                anyhow::bail!("URL文件不存在: {}", file_path);
            }
            let content = fs::read_to_string(file_path)
                .with_context(|| format!("无法读取URL文件: {}", file_path))?;
            // 按行读取URL，忽略空行和注释
            collected.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }

        validator::validate_urls(&collected)?;
        Ok(collected)
    }
}
