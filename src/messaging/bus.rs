//! 进程内发布/订阅总线
//!
//! `publish` 在发布者线程上同步执行：按订阅顺序遍历邮箱，投递给主题匹配的每一个邮箱。
//! 由于 `Mailbox::receive` 从不阻塞，慢订阅者不会拖住发布者。

use std::sync::{Arc, PoisonError, RwLock};

use super::mailbox::Mailbox;
use super::message::Message;

#[derive(Debug, Default)]
pub struct Bus {
    mailboxes: RwLock<Vec<Arc<Mailbox>>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, message: Message) {
        let mailboxes = self.mailboxes.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0usize;
        for mailbox in recipients(&mailboxes, message.topic()) {
            if mailbox.receive(message.clone()) {
                delivered += 1;
            }
        }
        log::trace!(
            "发布 {} -> {}，投递到 {} 个邮箱",
            message.action(),
            message.topic(),
            delivered
        );
    }

    pub fn subscribe(&self, mailbox: Arc<Mailbox>) {
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(mailbox);
    }

    /// 按指针身份移除邮箱；返回是否找到
    pub fn unsubscribe(&self, mailbox: &Arc<Mailbox>) -> bool {
        let mut mailboxes = self.mailboxes.write().unwrap_or_else(PoisonError::into_inner);
        let before = mailboxes.len();
        mailboxes.retain(|m| !Arc::ptr_eq(m, mailbox));
        mailboxes.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.mailboxes.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// 主题匹配的邮箱，保持订阅顺序
fn recipients<'a>(
    mailboxes: &'a [Arc<Mailbox>],
    topic: &'a str,
) -> impl Iterator<Item = &'a Arc<Mailbox>> + 'a {
    mailboxes.iter().filter(move |m| m.accepts(topic))
}

/// 订阅守卫：创建时订阅，析构时自动退订
#[derive(Debug)]
pub struct Subscription {
    bus: Arc<Bus>,
    mailbox: Arc<Mailbox>,
}

impl Subscription {
    pub fn new(bus: Arc<Bus>, mailbox: Mailbox) -> Self {
        let mailbox = Arc::new(mailbox);
        bus.subscribe(Arc::clone(&mailbox));
        Self { bus, mailbox }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.mailbox);
    }
}
