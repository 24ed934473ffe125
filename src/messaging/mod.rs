//! 消息层：消息信封、有界邮箱、进程内总线与跨进程桥接

pub mod bridge;
pub mod bus;
pub mod mailbox;
pub mod message;

pub use bridge::{Bridge, BridgeConfig, BridgeListener};
pub use bus::{Bus, Subscription};
pub use mailbox::Mailbox;
pub use message::{CreateDownload, Message, OperationRequest, Payload};

/// 注册中心默认主题
pub const SERVER_TOPIC: &str = "downloadserver";
/// 前端默认主题
pub const CLIENT_TOPIC: &str = "downloadclient";

/// 某个下载的工作线程私有主题
pub fn worker_topic(download_id: u64) -> String {
    format!("downloadworker{}", download_id)
}
