use anyhow::{Context, Result};
use clap::CommandFactory;
use std::sync::Arc;

use relaydown::cli::{self, Command};
use relaydown::config::Config;
use relaydown::core::DownloadServer;
use relaydown::messaging::{bridge, Bus, BridgeListener};
use relaydown::ui::{self, ConsoleClient};
use relaydown::utils::{logger, validator};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("参数解析失败: {:#}", e);
            std::process::exit(1);
        }
    };

    logger::init(config.log_file.as_deref(), &config.log_level, config.log_max_size)?;
    log::info!("程序启动");
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());

    match args.command.clone() {
        Some(Command::Get { .. }) => run_local(&args, config).await,
        Some(Command::Serve { .. }) => run_serve(config).await,
        Some(Command::Remote { uri, .. }) => run_remote(&args, &uri, config).await,
        None => {
            cli::Args::command().print_help()?;
            Ok(())
        }
    }
}

/// 本进程内的总线、注册中心与终端前端
async fn run_local(args: &cli::Args, config: Config) -> Result<()> {
    let urls = args.get_urls()?;
    println!("{}", config.get_summary());

    let bus = Bus::new();
    let server = DownloadServer::new(Arc::clone(&bus), config.client_topic.as_str(), config.worker_config())
        .spawn()
        .context("无法启动注册中心线程")?;

    let mut console = ConsoleClient::new(
        bus,
        &config.server_topic,
        &config.client_topic,
        config.mailbox_capacity,
    );
    console.submit(&urls, &config.download_dir);

    let summary = tokio::task::spawn_blocking(move || {
        let summary = console.run();
        server.shutdown();
        summary
    })
    .await??;

    println!("{}", summary);
    log::info!(
        "下载结束 - 成功: {}, 失败: {}, 取消: {}",
        summary.success_count,
        summary.failed_count,
        summary.canceled_count
    );
    Ok(())
}

/// 注册中心加桥接监听，等待远程前端
async fn run_serve(config: Config) -> Result<()> {
    let bus = Bus::new();
    let server = DownloadServer::new(Arc::clone(&bus), config.client_topic.as_str(), config.worker_config())
        .spawn()
        .context("无法启动注册中心线程")?;

    let listener = BridgeListener::bind(
        config.listen_addr(),
        bus,
        config.bridge_config(&config.client_topic),
    )
    .await
    .with_context(|| format!("无法监听 {}", config.listen_addr()))?;
    ui::print_success(&format!("下载服务已启动: ws://{}", listener.local_addr()?));

    let result = tokio::select! {
        result = listener.serve() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            log::info!("收到中断信号，停止服务");
            Ok(())
        }
    };

    tokio::task::spawn_blocking(move || server.shutdown()).await?;
    result
}

/// 通过桥接驱动远程注册中心
async fn run_remote(args: &cli::Args, uri: &str, config: Config) -> Result<()> {
    validator::validate_bridge_uri(uri)?;
    let urls = args.get_urls()?;

    let bus = Bus::new();
    let bridge = bridge::connect(uri, Arc::clone(&bus), config.bridge_config(&config.server_topic))
        .await
        .with_context(|| format!("无法连接到 {}", uri))?;
    ui::print_success(&format!("已连接到 {}", uri));

    let bridge_task = tokio::spawn(async move {
        if let Err(e) = bridge.run().await {
            ui::print_error(&format!("与下载服务的连接中断: {}", e));
        }
    });

    let mut console = ConsoleClient::new(
        bus,
        &config.server_topic,
        &config.client_topic,
        config.mailbox_capacity,
    );
    console.submit(&urls, &config.download_dir);
    let summary = tokio::task::spawn_blocking(move || console.run()).await??;

    bridge_task.abort();
    println!("{}", summary);
    Ok(())
}
