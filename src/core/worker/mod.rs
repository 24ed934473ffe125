//! 下载工作线程
//!
//! 每个进行中的下载对应一个 [`DownloadWorker`]，运行在独立线程上，只订阅自己的私有主题
//! `downloadworker{id}`。状态机：
//!
//! 1. 解析：探测元数据，发布 DownloadInfo 与初始状态；失败则以 ERROR 结束
//! 2. 空闲：阻塞等待操作消息，逐条处理
//! 3. 传输：由策略执行，只在检查点处理暂停与取消
//!
//! 到达终止状态后线程退出，订阅随之释放。

pub mod http;
pub mod pipeline;
pub mod strategy;

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::download::{Download, DownloadOperation, DownloadStatus, StatusSnapshot};
use crate::core::error::DownloadResult;
use crate::messaging::{worker_topic, Bus, Mailbox, Message, Payload, Subscription, SERVER_TOPIC};

pub use http::HttpTransfer;
pub use pipeline::PipelineTransfer;
pub use strategy::{Checkpoint, Resolved, TransferEnd, TransferKind, TransferStrategy};

/// 每次读取的分块大小 (100 KiB)
pub const CHUNK_SIZE: usize = 100 * 1024;
/// 状态上报与操作检查的间隔
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(1);
/// 元数据探测超时
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 回复发往的注册中心主题
    pub server_topic: String,
    pub mailbox_capacity: usize,
    pub chunk_size: usize,
    pub update_interval: Duration,
    pub probe_timeout: Duration,
    pub user_agent: String,
    pub pipeline_program: String,
    pub pipeline_hosts: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_topic: SERVER_TOPIC.to_string(),
            mailbox_capacity: crate::messaging::mailbox::DEFAULT_CAPACITY,
            chunk_size: CHUNK_SIZE,
            update_interval: UPDATE_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            user_agent: format!("relaydown/{}", env!("CARGO_PKG_VERSION")),
            pipeline_program: "yt-dlp".to_string(),
            pipeline_hosts: vec!["youtube.com".to_string(), "youtu.be".to_string()],
        }
    }
}

/// 按资源形态选择传输策略
pub fn select_strategy(url: &str, config: &WorkerConfig) -> DownloadResult<Box<dyn TransferStrategy>> {
    match TransferKind::detect(url, &config.pipeline_hosts) {
        TransferKind::Http => Ok(Box::new(HttpTransfer::new(config)?)),
        TransferKind::Pipeline => Ok(Box::new(PipelineTransfer::new(config))),
    }
}

/// 工作线程的可变状态，与策略分开存放以便在传输回调中借用
struct WorkerState {
    subscription: Subscription,
    server_topic: String,
    download: Download,
    status: DownloadStatus,
    downloaded_bytes: u64,
    speed: f64,
}

impl WorkerState {
    fn id(&self) -> u64 {
        self.download.download_id
    }

    fn send(&self, payload: Payload) {
        self.subscription
            .bus()
            .publish(Message::new(self.server_topic.as_str(), payload));
    }

    fn announce(&self) {
        self.send(Payload::DownloadInfo(self.download.clone()));
    }

    fn publish_status(&self) {
        let snapshot = StatusSnapshot::new(
            self.id(),
            self.status,
            self.downloaded_bytes,
            self.download.size,
            self.speed,
        );
        self.send(Payload::DownloadStatus(snapshot));
    }

    /// 应用一条操作消息，返回被接受的操作
    fn apply(&mut self, message: Message) -> Option<DownloadOperation> {
        let Payload::DownloadOperation(request) = message.into_payload() else {
            return None;
        };
        if request.download_id != self.id() {
            return None;
        }
        let operation = request.download_operation;
        match self.status.apply(operation, self.download.is_pausable) {
            Some(next) => {
                log::debug!("下载 {}: {} {} -> {}", self.id(), operation, self.status, next);
                self.status = next;
                Some(operation)
            }
            None => {
                log::debug!("下载 {}: 状态 {} 下忽略 {}", self.id(), self.status, operation);
                None
            }
        }
    }

    /// 传输中的检查点：更新计数，处理积压的操作，决定是否继续
    fn checkpoint(&mut self, progress: Checkpoint) -> ControlFlow<()> {
        self.downloaded_bytes = progress.downloaded_bytes;
        self.speed = progress.speed;
        if progress.total_bytes > 0 && progress.total_bytes != self.download.size {
            self.download.size = progress.total_bytes;
            self.announce();
        }

        for message in self.subscription.mailbox().drain() {
            self.apply(message);
        }
        if matches!(self.status, DownloadStatus::Paused | DownloadStatus::Canceled) {
            return ControlFlow::Break(());
        }
        self.publish_status();
        ControlFlow::Continue(())
    }
}

pub struct DownloadWorker {
    strategy: Box<dyn TransferStrategy>,
    state: WorkerState,
}

impl DownloadWorker {
    /// 创建工作线程并立即订阅私有主题，创建之后发来的操作不会丢失
    pub fn new(
        bus: Arc<Bus>,
        download_id: u64,
        url: &str,
        download_directory: &str,
        strategy: Box<dyn TransferStrategy>,
        config: &WorkerConfig,
    ) -> Self {
        let mailbox = Mailbox::with_capacity([worker_topic(download_id)], config.mailbox_capacity);
        let subscription = Subscription::new(bus, mailbox);
        Self {
            strategy,
            state: WorkerState {
                subscription,
                server_topic: config.server_topic.clone(),
                download: Download::placeholder(download_id, url, download_directory),
                status: DownloadStatus::Unstarted,
                downloaded_bytes: 0,
                speed: 0.0,
            },
        }
    }

    pub fn download_id(&self) -> u64 {
        self.state.id()
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("download-worker-{}", self.download_id()))
            .spawn(move || self.run())
    }

    /// 在当前线程上运行直到终止状态
    pub fn run(mut self) {
        if !self.resolve() {
            return;
        }
        while !self.state.status.is_terminal() {
            self.state.subscription.mailbox().wait();
            while let Some(message) = self.state.subscription.mailbox().try_next() {
                self.handle_idle(message);
                if self.state.status.is_terminal() {
                    break;
                }
            }
        }
        log::info!("下载 {} 结束: {}", self.download_id(), self.state.status);
    }

    fn resolve(&mut self) -> bool {
        let id = self.download_id();
        let url = self.state.download.url.clone();
        let directory = self.state.download.download_directory.clone();
        match self.strategy.resolve(&url) {
            Ok(resolved) => {
                self.state.download = Download::new(
                    id,
                    url,
                    directory,
                    resolved.size,
                    resolved.filename,
                    resolved.is_pausable,
                );
                self.state.announce();
                self.state.publish_status();
                true
            }
            Err(e) => {
                log::error!("下载 {} 解析失败 {}: {}", id, url, e);
                self.state.download = Download::placeholder(id, &url, &directory);
                self.state.status = DownloadStatus::Error;
                self.state.announce();
                self.state.publish_status();
                false
            }
        }
    }

    fn handle_idle(&mut self, message: Message) {
        match self.state.apply(message) {
            Some(DownloadOperation::Start) => self.transfer(),
            Some(DownloadOperation::Cancel) => {
                self.discard();
                self.state.speed = 0.0;
                self.state.publish_status();
            }
            Some(DownloadOperation::Pause) | None => {}
        }
    }

    fn transfer(&mut self) {
        let download = self.state.download.clone();
        let offset = self.state.downloaded_bytes;
        log::info!("下载 {} 开始传输 {}，起始偏移 {}", download.download_id, download.url, offset);
        self.state.publish_status();

        let state = &mut self.state;
        let result = self
            .strategy
            .transfer(&download, offset, &mut |progress| state.checkpoint(progress));

        self.state.speed = 0.0;
        match result {
            Ok(TransferEnd::Stopped { downloaded_bytes }) => {
                self.state.downloaded_bytes = downloaded_bytes;
                match self.state.status {
                    DownloadStatus::Canceled => self.discard(),
                    DownloadStatus::Paused => {}
                    _ => self.state.status = DownloadStatus::Error,
                }
            }
            Ok(TransferEnd::Finished {
                downloaded_bytes,
                total_bytes,
            }) => {
                self.state.downloaded_bytes = downloaded_bytes;
                if total_bytes != self.state.download.size {
                    self.state.download.size = total_bytes;
                    self.state.announce();
                }
                self.state.status = if downloaded_bytes == total_bytes {
                    DownloadStatus::Completed
                } else {
                    log::error!(
                        "下载 {} 数据不完整: 预期 {} 实际 {}",
                        download.download_id,
                        total_bytes,
                        downloaded_bytes
                    );
                    DownloadStatus::Error
                };
            }
            Err(e) => {
                log::error!("下载 {} 传输失败: {}", download.download_id, e);
                self.state.status = DownloadStatus::Error;
            }
        }
        self.state.publish_status();
    }

    fn discard(&self) {
        if let Err(e) = self.strategy.discard(&self.state.download) {
            log::warn!("删除未完成文件 {} 失败: {}", self.state.download.filepath, e);
        }
    }
}
