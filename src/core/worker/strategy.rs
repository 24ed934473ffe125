//! 传输策略
//!
//! 工作线程只有一种类型，解析与传输的差异由 [`TransferStrategy`] 承担。
//! 策略按资源形态选择：普通 HTTP 资源走字节范围下载，`pipeline_hosts` 中的站点交给外部提取程序。

use std::fs;
use std::io;
use std::ops::ControlFlow;
use url::Url;

use crate::core::download::Download;
use crate::core::error::DownloadResult;

/// 元数据探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub size: u64,
    pub filename: String,
    pub is_pausable: bool,
}

/// 传输过程中按固定间隔上报的进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// 本间隔内的瞬时速度 (B/s)
    pub speed: f64,
}

/// 传输结束的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEnd {
    /// 检查点回调要求停止（暂停或取消）
    Stopped { downloaded_bytes: u64 },
    /// 数据流自然结束；字节数是否完整由调用方判断
    Finished { downloaded_bytes: u64, total_bytes: u64 },
}

/// 检查点回调，返回 `Break` 表示协作式停止
pub type CheckpointFn<'a> = dyn FnMut(Checkpoint) -> ControlFlow<()> + 'a;

pub trait TransferStrategy: Send {
    /// 探测资源的大小、文件名以及是否支持续传
    fn resolve(&self, url: &str) -> DownloadResult<Resolved>;

    /// 从 `offset` 开始传输到 `download.filepath`
    fn transfer(
        &mut self,
        download: &Download,
        offset: u64,
        checkpoint: &mut CheckpointFn<'_>,
    ) -> DownloadResult<TransferEnd>;

    /// 删除未完成的文件
    fn discard(&self, download: &Download) -> io::Result<()> {
        remove_if_exists(download.path())
    }
}

pub(crate) fn remove_if_exists(path: impl AsRef<std::path::Path>) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Http,
    Pipeline,
}

impl TransferKind {
    pub fn detect(url: &str, pipeline_hosts: &[String]) -> Self {
        let host = match Url::parse(url) {
            Ok(parsed) => parsed.host_str().map(str::to_ascii_lowercase),
            Err(_) => None,
        };
        let Some(host) = host else {
            return TransferKind::Http;
        };
        let matches = pipeline_hosts.iter().any(|candidate| {
            let candidate = candidate.to_ascii_lowercase();
            host == candidate || host.ends_with(&format!(".{}", candidate))
        });
        if matches {
            TransferKind::Pipeline
        } else {
            TransferKind::Http
        }
    }
}
