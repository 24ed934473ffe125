//! 下载的数据模型：下载信息、状态、操作与状态快照

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 下载状态
///
/// 合法转换：
/// `UNSTARTED → IN_PROGRESS`，`IN_PROGRESS → PAUSED | COMPLETED | ERROR | CANCELED`，
/// `PAUSED → IN_PROGRESS | CANCELED`；`COMPLETED`、`CANCELED`、`ERROR` 为终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Unstarted,
    InProgress,
    Paused,
    Completed,
    Canceled,
    Error,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Canceled | DownloadStatus::Error
        )
    }

    /// 计算在当前状态下执行 `operation` 之后的状态，不合法的操作返回 `None`
    pub fn apply(self, operation: DownloadOperation, is_pausable: bool) -> Option<DownloadStatus> {
        match (operation, self) {
            (DownloadOperation::Start, DownloadStatus::Unstarted | DownloadStatus::Paused) => {
                Some(DownloadStatus::InProgress)
            }
            (DownloadOperation::Pause, DownloadStatus::InProgress) if is_pausable => {
                Some(DownloadStatus::Paused)
            }
            (
                DownloadOperation::Cancel,
                DownloadStatus::Unstarted | DownloadStatus::InProgress | DownloadStatus::Paused,
            ) => Some(DownloadStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStatus::Unstarted => "UNSTARTED",
            DownloadStatus::InProgress => "IN_PROGRESS",
            DownloadStatus::Paused => "PAUSED",
            DownloadStatus::Completed => "COMPLETED",
            DownloadStatus::Canceled => "CANCELED",
            DownloadStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// 下载操作，只作为命令使用，从不作为状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadOperation {
    Start,
    Pause,
    Cancel,
}

impl fmt::Display for DownloadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadOperation::Start => "START",
            DownloadOperation::Pause => "PAUSE",
            DownloadOperation::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

/// 下载信息
///
/// `filepath` 始终等于 `download_directory` 与 `filename` 的拼接。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub download_id: u64,
    pub url: String,
    pub download_directory: String,
    pub size: u64,
    pub filename: String,
    pub filepath: String,
    pub is_pausable: bool,
}

impl Download {
    pub fn new(
        download_id: u64,
        url: impl Into<String>,
        download_directory: impl Into<String>,
        size: u64,
        filename: impl Into<String>,
        is_pausable: bool,
    ) -> Self {
        let download_directory = download_directory.into();
        let filename = filename.into();
        let filepath = Path::new(&download_directory)
            .join(&filename)
            .to_string_lossy()
            .into_owned();
        Self {
            download_id,
            url: url.into(),
            download_directory,
            size,
            filename,
            filepath,
            is_pausable,
        }
    }

    /// 解析失败时使用的占位信息：文件名为原始 URL，大小为 0
    pub fn placeholder(download_id: u64, url: &str, download_directory: &str) -> Self {
        Self::new(download_id, url, download_directory, 0, url, false)
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.filepath)
    }
}

/// 某个下载最近一次发布的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub download_id: u64,
    pub status: DownloadStatus,
    pub downloaded_bytes: u64,
    /// downloaded_bytes / size，范围 0.0–1.0
    pub progress: f64,
    /// 瞬时速度 (B/s)
    pub speed: f64,
}

impl StatusSnapshot {
    pub fn new(
        download_id: u64,
        status: DownloadStatus,
        downloaded_bytes: u64,
        size: u64,
        speed: f64,
    ) -> Self {
        let progress = if status == DownloadStatus::Completed {
            1.0
        } else if size > 0 {
            downloaded_bytes as f64 / size as f64
        } else {
            0.0
        };
        Self {
            download_id,
            status,
            downloaded_bytes,
            progress,
            speed,
        }
    }
}
