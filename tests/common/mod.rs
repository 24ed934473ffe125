//! 测试用的回环 HTTP 文件服务
//!
//! 每个连接只处理一个请求并以 `Connection: close` 结束，支持 HEAD、GET 与 `Range: bytes=N-`。

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use relaydown::core::download::{DownloadStatus, StatusSnapshot};
use relaydown::core::worker::WorkerConfig;
use relaydown::messaging::{Mailbox, Message, Payload};

#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub body: Vec<u8>,
    pub accept_ranges: bool,
    /// 为 false 时忽略 Range，总是返回 200 与完整内容
    pub honor_range: bool,
    pub head_status: u16,
    pub omit_content_length: bool,
    /// GET 只发送前 N 个字节后断开，但仍声明完整长度
    pub truncate_get_at: Option<usize>,
    pub content_disposition: Option<String>,
}

impl FixtureOptions {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            accept_ranges: true,
            honor_range: true,
            head_status: 200,
            omit_content_length: false,
            truncate_get_at: None,
            content_disposition: None,
        }
    }
}

/// 一条请求记录：方法与 Range 头
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLog {
    pub method: String,
    pub range: Option<String>,
    pub bytes_sent: usize,
}

pub struct FileServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RequestLog>>>,
}

impl FileServer {
    pub fn start(options: FixtureOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let options = Arc::new(options);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let log = Arc::clone(&log);
                let options = Arc::clone(&options);
                thread::spawn(move || handle(stream, &options, &log));
            }
        });
        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn requests(&self) -> Vec<RequestLog> {
        self.requests.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<RequestLog> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }
}

fn handle(mut stream: TcpStream, options: &FixtureOptions, log: &Mutex<Vec<RequestLog>>) -> Option<()> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let method = request_line.split_whitespace().next()?.to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }

    let total = options.body.len();
    let mut headers = Vec::new();
    if options.accept_ranges {
        headers.push("Accept-Ranges: bytes".to_string());
    }
    if let Some(disposition) = &options.content_disposition {
        headers.push(format!("Content-Disposition: {}", disposition));
    }
    headers.push("Connection: close".to_string());

    if method == "HEAD" {
        if !options.omit_content_length {
            headers.push(format!("Content-Length: {}", total));
        }
        let reason = if options.head_status == 200 { "OK" } else { "Error" };
        log.lock().unwrap().push(RequestLog {
            method,
            range,
            bytes_sent: 0,
        });
        return write_head(&mut stream, options.head_status, reason, &headers).ok();
    }

    let start = match (&range, options.honor_range) {
        (Some(value), true) => value
            .trim_start_matches("bytes=")
            .trim_end_matches('-')
            .parse::<usize>()
            .ok()
            .filter(|start| *start <= total),
        _ => None,
    };
    let (status, reason, payload) = match start {
        Some(start) => {
            headers.push(format!("Content-Range: bytes {}-{}/{}", start, total.saturating_sub(1), total));
            (206, "Partial Content", &options.body[start..])
        }
        None => (200, "OK", &options.body[..]),
    };
    headers.push(format!("Content-Length: {}", payload.len()));
    let sent = match options.truncate_get_at {
        Some(limit) => &payload[..limit.min(payload.len())],
        None => payload,
    };
    // 先记录，客户端中途断开时写入会失败
    log.lock().unwrap().push(RequestLog {
        method,
        range,
        bytes_sent: sent.len(),
    });

    write_head(&mut stream, status, reason, &headers).ok()?;
    stream.write_all(sent).ok()?;
    stream.flush().ok()
}

fn write_head(stream: &mut TcpStream, status: u16, reason: &str, headers: &[String]) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for header in headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())
}

/// 可预测的测试数据
pub fn sample_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 小分块、零间隔：每读满一块就到达一次检查点
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        chunk_size: 1024,
        update_interval: Duration::ZERO,
        probe_timeout: Duration::from_secs(5),
        mailbox_capacity: 256,
        ..WorkerConfig::default()
    }
}

/// 在超时内收集消息，直到某条满足条件
pub fn collect_until(
    mailbox: &Mailbox,
    timeout: Duration,
    mut done: impl FnMut(&Message) -> bool,
) -> Vec<Message> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    loop {
        while let Some(message) = mailbox.try_next() {
            let finished = done(&message);
            collected.push(message);
            if finished {
                return collected;
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "等待消息超时，已收到: {:?}", collected);
        mailbox.wait_timeout(remaining);
    }
}

pub fn snapshots(messages: &[Message]) -> Vec<StatusSnapshot> {
    messages
        .iter()
        .filter_map(|m| match m.payload() {
            Payload::DownloadStatus(snapshot) => Some(snapshot.clone()),
            _ => None,
        })
        .collect()
}

pub fn is_status(message: &Message, status: DownloadStatus) -> bool {
    matches!(message.payload(), Payload::DownloadStatus(s) if s.status == status)
}

pub fn is_terminal_status(message: &Message) -> bool {
    matches!(message.payload(), Payload::DownloadStatus(s) if s.status.is_terminal())
}
