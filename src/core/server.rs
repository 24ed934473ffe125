//! 下载注册中心
//!
//! 负责分配下载 ID、为每个下载启动工作线程、把前端的操作转发给对应工作线程，
//! 并把工作线程上报的信息与状态转发给前端。下载到达终止状态后即从表中移除。
//!
//! 三张表只由注册中心自己的线程读写。

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::download::{Download, DownloadOperation, StatusSnapshot};
use crate::core::worker::{select_strategy, DownloadWorker, WorkerConfig};
use crate::messaging::{worker_topic, Bus, Mailbox, Message, Payload, Subscription};

/// 等待消息的超时，用于检查停止标志
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct DownloadServer {
    subscription: Subscription,
    client_topic: String,
    worker_config: WorkerConfig,
    next_id: u64,
    downloads: HashMap<u64, Download>,
    statuses: HashMap<u64, StatusSnapshot>,
    /// 已启动工作线程、尚未终止的下载 (id -> url)
    tracked: HashMap<u64, String>,
    stop: Arc<AtomicBool>,
}

impl DownloadServer {
    pub fn new(bus: Arc<Bus>, client_topic: impl Into<String>, worker_config: WorkerConfig) -> Self {
        let mailbox = Mailbox::with_capacity(
            [worker_config.server_topic.as_str()],
            worker_config.mailbox_capacity,
        );
        Self {
            subscription: Subscription::new(bus, mailbox),
            client_topic: client_topic.into(),
            worker_config,
            next_id: 1,
            downloads: HashMap::new(),
            statuses: HashMap::new(),
            tracked: HashMap::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn downloads(&self) -> &HashMap<u64, Download> {
        &self.downloads
    }

    pub fn statuses(&self) -> &HashMap<u64, StatusSnapshot> {
        &self.statuses
    }

    pub fn is_tracked(&self, download_id: u64) -> bool {
        self.tracked.contains_key(&download_id)
    }

    /// 等待新消息，返回是否有消息可处理
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.subscription.mailbox().wait_timeout(timeout)
    }

    /// 处理当前排队的全部消息，返回处理的条数
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Some(message) = self.subscription.mailbox().try_next() {
            self.handle(message);
            count += 1;
        }
        count
    }

    pub fn handle(&mut self, message: Message) {
        match message.payload() {
            Payload::CreateDownload(request) => {
                let url = request.url.clone();
                let directory = request.download_directory.clone();
                self.create_download(&url, &directory);
            }
            Payload::DownloadOperation(request) => {
                self.forward_operation(request.download_id, request.download_operation);
            }
            Payload::DownloadInfo(download) => {
                if !self.is_tracked(download.download_id) {
                    return;
                }
                self.downloads.insert(download.download_id, download.clone());
                self.forward(&message);
            }
            Payload::DownloadStatus(snapshot) => {
                let download_id = snapshot.download_id;
                if !self.is_tracked(download_id) {
                    return;
                }
                let terminal = snapshot.status.is_terminal();
                self.statuses.insert(download_id, snapshot.clone());
                self.forward(&message);
                if terminal {
                    self.evict(download_id);
                }
            }
            Payload::Unrecognized { action, .. } => {
                log::debug!("忽略未知动作: {}", action);
            }
        }
    }

    /// 为 URL 启动一个工作线程；同一 URL 正在进行时忽略
    fn create_download(&mut self, url: &str, download_directory: &str) {
        if self.tracked.values().any(|tracked| tracked == url) {
            log::info!("下载已存在，忽略: {}", url);
            return;
        }
        let directory = absolute_directory(download_directory);

        let strategy = match select_strategy(url, &self.worker_config) {
            Ok(strategy) => strategy,
            Err(e) => {
                log::error!("无法为 {} 创建传输策略: {}", url, e);
                return;
            }
        };

        let download_id = self.next_id;
        self.next_id += 1;

        let worker = DownloadWorker::new(
            Arc::clone(self.subscription.bus()),
            download_id,
            url,
            &directory,
            strategy,
            &self.worker_config,
        );
        match worker.spawn() {
            Ok(_) => {
                log::info!("创建下载 {}: {} -> {}", download_id, url, directory);
                self.tracked.insert(download_id, url.to_string());
            }
            Err(e) => log::error!("无法启动下载线程 {}: {}", download_id, e),
        }
    }

    fn forward_operation(&self, download_id: u64, operation: DownloadOperation) {
        log::debug!("转发 {} 到下载 {}", operation, download_id);
        self.subscription.bus().publish(Message::operation(
            worker_topic(download_id),
            download_id,
            operation,
        ));
    }

    fn forward(&self, message: &Message) {
        self.subscription
            .bus()
            .publish(message.readdressed(self.client_topic.as_str()));
    }

    fn evict(&mut self, download_id: u64) {
        self.downloads.remove(&download_id);
        self.statuses.remove(&download_id);
        self.tracked.remove(&download_id);
        log::debug!("下载 {} 已结束，移出注册表", download_id);
    }

    /// 在当前线程上运行，直到停止标志被设置
    pub fn run(mut self) {
        log::info!("注册中心已启动，监听主题 {}", self.worker_config.server_topic);
        while !self.stop.load(Ordering::SeqCst) {
            if self.wait_timeout(POLL_TIMEOUT) {
                self.process_pending();
            }
        }
        log::info!("注册中心已停止");
    }

    pub fn spawn(self) -> io::Result<ServerHandle> {
        let stop = Arc::clone(&self.stop);
        let thread = thread::Builder::new()
            .name("download-server".to_string())
            .spawn(move || self.run())?;
        Ok(ServerHandle { stop, thread })
    }
}

fn absolute_directory(directory: &str) -> String {
    match std::path::absolute(Path::new(directory)) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => directory.to_string(),
    }
}

/// 注册中心线程的句柄
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    /// 请求停止并等待线程退出；工作线程不受影响
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.thread.join().is_err() {
            log::error!("注册中心线程异常退出");
        }
    }
}
