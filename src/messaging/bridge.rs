//! WebSocket 桥接
//!
//! 桥接让本地总线与远端对等方的总线表现为同一条逻辑总线。每个 [`Message`] 编码为一个
//! JSON 文本帧。只有主题等于 `remote_topic`（对端拥有的主题）的消息才会被送出。
//!
//! 一个桥接实例包含两个转发循环：
//! - 出站：定时清空出站邮箱，逐条写帧
//! - 入站：读帧、解码、在本地总线上 `publish`
//!
//! 任一循环结束，整个实例即停止并退订出站邮箱。不做重连。

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::bus::{Bus, Subscription};
use super::mailbox::{Mailbox, DEFAULT_CAPACITY};
use super::message::Message;
use crate::core::error::BridgeError;

/// 出站轮询间隔默认值
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// 需要转发给对端的主题
    pub remote_topic: String,
    pub poll_interval: Duration,
    /// 出站队列容量，满了即丢弃
    pub capacity: usize,
}

impl BridgeConfig {
    pub fn new(remote_topic: impl Into<String>) -> Self {
        Self {
            remote_topic: remote_topic.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// 一条已建立连接上的桥接实例
///
/// 出站邮箱在创建时即订阅，`run` 开始之前发布的消息也会被转发。
pub struct Bridge<S> {
    subscription: Subscription,
    stream: WebSocketStream<S>,
    poll_interval: Duration,
}

impl<S> Bridge<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(bus: Arc<Bus>, stream: WebSocketStream<S>, config: BridgeConfig) -> Self {
        let mailbox = Mailbox::with_capacity([config.remote_topic.as_str()], config.capacity);
        log::info!("桥接已建立，转发主题: {}", config.remote_topic);
        Self {
            subscription: Subscription::new(bus, mailbox),
            stream,
            poll_interval: config.poll_interval,
        }
    }

    /// 运行两个转发循环，直到连接关闭或出错
    pub async fn run(self) -> Result<(), BridgeError> {
        let Bridge {
            subscription,
            stream,
            poll_interval,
        } = self;

        let (sink, source) = stream.split();
        let result = tokio::select! {
            result = relay_outbound(sink, subscription.mailbox(), poll_interval) => result,
            result = relay_inbound(source, subscription.bus()) => result,
        };

        drop(subscription);
        match &result {
            Ok(()) => log::info!("桥接连接已关闭"),
            Err(e) => log::warn!("桥接连接中断: {}", e),
        }
        result
    }
}

async fn relay_outbound<W>(
    mut sink: W,
    mailbox: &Mailbox,
    poll_interval: Duration,
) -> Result<(), BridgeError>
where
    W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    loop {
        for message in mailbox.drain() {
            match message.encode() {
                Ok(text) => sink.send(WsMessage::text(text)).await?,
                Err(e) => log::warn!("无法编码消息 {}: {}", message.action(), e),
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn relay_inbound<R>(mut source: R, bus: &Bus) -> Result<(), BridgeError>
where
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = source.next().await {
        let decoded = match frame? {
            WsMessage::Text(text) => Message::decode(text.as_str()),
            WsMessage::Binary(bytes) => Message::decode_slice(&bytes),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        match decoded {
            Ok(message) => bus.publish(message),
            Err(e) => log::warn!("丢弃无法解析的帧: {}", e),
        }
    }
    Ok(())
}

/// 连接到远端监听器，建立一个桥接实例
pub async fn connect(
    uri: &str,
    bus: Arc<Bus>,
    config: BridgeConfig,
) -> Result<Bridge<MaybeTlsStream<TcpStream>>, BridgeError> {
    let (stream, _response) = tokio_tungstenite::connect_async(uri).await?;
    log::info!("已连接到 {}", uri);
    Ok(Bridge::new(bus, stream, config))
}

/// 监听端：依次接受连接，每个连接托管一个桥接实例
pub struct BridgeListener {
    listener: TcpListener,
    bus: Arc<Bus>,
    config: BridgeConfig,
}

impl BridgeListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        bus: Arc<Bus>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            bus,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> Result<Bridge<TcpStream>, BridgeError> {
        let (tcp, peer) = self.listener.accept().await?;
        let stream = tokio_tungstenite::accept_async(tcp).await?;
        log::info!("接受来自 {} 的桥接连接", peer);
        Ok(Bridge::new(
            Arc::clone(&self.bus),
            stream,
            self.config.clone(),
        ))
    }

    /// 顺序托管连接：一个连接断开后再接受下一个
    pub async fn serve(self) -> Result<(), BridgeError> {
        log::info!("桥接监听于 {}", self.local_addr()?);
        loop {
            match self.accept().await {
                Ok(bridge) => {
                    // 连接错误只结束当前实例
                    let _ = bridge.run().await;
                }
                Err(BridgeError::Io(e)) => return Err(BridgeError::Io(e)),
                Err(e) => log::warn!("握手失败: {}", e),
            }
        }
    }
}
