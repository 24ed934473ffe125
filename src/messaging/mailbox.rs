//! 有界邮箱（订阅者）
//!
//! 邮箱在创建时绑定一组固定主题。`receive` 永不阻塞：队列已满时新消息被静默丢弃。
//! 队列非空即为“有消息”信号，拥有者线程在 `wait` 上阻塞，随后用 `try_next` / `drain` 取出消息。

use crossbeam_channel::{bounded, Receiver, Select, Sender, TrySendError};
use std::collections::HashSet;
use std::time::Duration;

use super::message::Message;

/// 默认邮箱容量
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct Mailbox {
    topics: HashSet<String>,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl Mailbox {
    pub fn new<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::with_capacity(topics, DEFAULT_CAPACITY)
    }

    pub fn with_capacity<I, T>(topics: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let (sender, receiver) = bounded(capacity);
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            sender,
            receiver,
        }
    }

    pub fn accepts(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn topics(&self) -> &HashSet<String> {
        &self.topics
    }

    /// 非阻塞入队；返回 `false` 表示队列已满、消息被丢弃
    pub fn receive(&self, message: Message) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                log::trace!("邮箱已满，丢弃消息: {} -> {}", message.action(), message.topic());
                false
            }
            // 邮箱自己持有接收端，不会断开
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// 阻塞直到有消息可取，不消费消息
    pub fn wait(&self) {
        let mut select = Select::new();
        select.recv(&self.receiver);
        select.ready();
    }

    /// 带超时的 `wait`；返回是否有消息
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut select = Select::new();
        select.recv(&self.receiver);
        select.ready_timeout(timeout).is_ok()
    }

    pub fn try_next(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// 取出当前排队的全部消息
    pub fn drain(&self) -> Vec<Message> {
        self.receiver.try_iter().collect()
    }
}
