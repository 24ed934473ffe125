//! 终端前端
//!
//! 订阅前端主题，为每个 DownloadInfo 建立进度条，按 DownloadStatus 更新。
//! 它只通过消息与注册中心交互，本地总线或桥接后的远程总线都一样。

mod progress;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, terminal};
use indicatif::HumanBytes;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use progress::ProgressManager;

use crate::core::download::{Download, DownloadOperation, DownloadStatus};
use crate::messaging::{Bus, Mailbox, Message, Payload, Subscription};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    eprintln!("✗ {}", message);
}

pub struct DownloadSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub elapsed_time: Duration,
    pub success_count: usize,
    pub failed_count: usize,
    pub canceled_count: usize,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "总文件数: {}", self.total_files)?;
        writeln!(f, "总大小: {}", HumanBytes(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        writeln!(f, "取消: {}", self.canceled_count)?;
        Ok(())
    }
}

/// 原始模式守卫，析构时恢复终端
struct RawMode;

impl RawMode {
    fn enable() -> Option<Self> {
        match terminal::enable_raw_mode() {
            Ok(()) => {
                let _ = execute!(std::io::stdout(), cursor::Hide);
                Some(RawMode)
            }
            Err(e) => {
                log::warn!("无法进入终端原始模式，键盘控制不可用: {}", e);
                None
            }
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = execute!(std::io::stdout(), cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// 键盘命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Operation(DownloadOperation),
    Quit,
}

fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }
    match key.code {
        KeyCode::Char('p') | KeyCode::Char('P') => Some(KeyAction::Operation(DownloadOperation::Pause)),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(KeyAction::Operation(DownloadOperation::Start)),
        KeyCode::Char('c') | KeyCode::Char('C') => Some(KeyAction::Operation(DownloadOperation::Cancel)),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

pub struct ConsoleClient {
    subscription: Subscription,
    server_topic: String,
    progress: ProgressManager,
    downloads: HashMap<u64, Download>,
    finished: HashMap<u64, DownloadStatus>,
    expected: usize,
}

impl ConsoleClient {
    /// 创建前端并订阅 `client_topic`
    pub fn new(bus: Arc<Bus>, server_topic: &str, client_topic: &str, capacity: usize) -> Self {
        let mailbox = Mailbox::with_capacity([client_topic], capacity);
        Self {
            subscription: Subscription::new(bus, mailbox),
            server_topic: server_topic.to_string(),
            progress: ProgressManager::new(),
            downloads: HashMap::new(),
            finished: HashMap::new(),
            expected: 0,
        }
    }

    /// 提交下载请求；重复的 URL 只提交一次
    pub fn submit(&mut self, urls: &[String], download_directory: &str) {
        let mut seen = HashSet::new();
        for url in urls.iter().filter(|url| seen.insert(url.as_str())) {
            self.subscription.bus().publish(Message::create_download(
                self.server_topic.as_str(),
                url.as_str(),
                download_directory,
            ));
            self.expected += 1;
            log::info!("提交下载: {}", url);
        }
    }

    fn send_to_all(&self, operation: DownloadOperation) {
        for id in self.downloads.keys().filter(|id| !self.finished.contains_key(id)) {
            self.subscription
                .bus()
                .publish(Message::operation(self.server_topic.as_str(), *id, operation));
        }
    }

    /// 处理收到的消息；新下载会被自动开始
    pub fn process_pending(&mut self) {
        for message in self.subscription.mailbox().drain() {
            match message.into_payload() {
                Payload::DownloadInfo(download) => {
                    self.progress.add_download(&download);
                    let id = download.download_id;
                    if self.downloads.insert(id, download).is_none() {
                        self.subscription.bus().publish(Message::operation(
                            self.server_topic.as_str(),
                            id,
                            DownloadOperation::Start,
                        ));
                    }
                }
                Payload::DownloadStatus(snapshot) => {
                    self.progress.update_progress(&snapshot);
                    if snapshot.status.is_terminal() {
                        self.finished.insert(snapshot.download_id, snapshot.status);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.expected > 0 && self.finished.len() >= self.expected
    }

    /// 主循环：处理键盘输入和进度，直到全部结束或用户退出
    pub fn run(mut self) -> Result<DownloadSummary> {
        let started = Instant::now();
        let raw_mode = RawMode::enable();
        self.progress
            .println("开始下载... (按 'p' 暂停, 'r' 继续, 'c' 取消, 'q' 退出)");

        while !self.is_done() {
            if raw_mode.is_some() {
                if let Ok(true) = event::poll(KEYBOARD_POLL_INTERVAL) {
                    if let Ok(Event::Key(key_event)) = event::read() {
                        match key_action(key_event) {
                            Some(KeyAction::Quit) => {
                                log::info!("用户主动退出");
                                break;
                            }
                            Some(KeyAction::Operation(operation)) => {
                                log::info!("用户对所有下载执行 {}", operation);
                                self.send_to_all(operation);
                            }
                            None => {}
                        }
                    }
                }
            } else {
                self.subscription.mailbox().wait_timeout(KEYBOARD_POLL_INTERVAL);
            }
            self.process_pending();
        }

        drop(raw_mode);
        self.progress.finish();
        Ok(self.summary(started.elapsed()))
    }

    pub fn summary(&self, elapsed_time: Duration) -> DownloadSummary {
        let count = |status: DownloadStatus| self.finished.values().filter(|s| **s == status).count();
        DownloadSummary {
            total_files: self.expected,
            total_size: self
                .finished
                .iter()
                .filter(|(_, status)| **status == DownloadStatus::Completed)
                .filter_map(|(id, _)| self.downloads.get(id))
                .map(|download| download.size)
                .sum(),
            elapsed_time,
            success_count: count(DownloadStatus::Completed),
            failed_count: count(DownloadStatus::Error),
            canceled_count: count(DownloadStatus::Canceled),
        }
    }
}
