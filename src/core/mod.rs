//! Core: 下载数据模型、注册中心、工作线程与错误类型

pub mod download;
pub mod error;
pub mod server;
pub mod worker;

pub use download::{Download, DownloadOperation, DownloadStatus, StatusSnapshot};
pub use error::{BridgeError, ConfigError, DownloadError, MessageError};
pub use server::{DownloadServer, ServerHandle};
pub use worker::{DownloadWorker, WorkerConfig};
