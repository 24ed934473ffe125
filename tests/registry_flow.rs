mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fast_worker_config, is_terminal_status, sample_body, snapshots, FileServer, FixtureOptions};
use relaydown::core::download::{Download, DownloadOperation, DownloadStatus};
use relaydown::core::DownloadServer;
use relaydown::messaging::{Bus, Mailbox, Message, Payload, CLIENT_TOPIC, SERVER_TOPIC};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Registry {
    bus: Arc<Bus>,
    server: DownloadServer,
    client: Arc<Mailbox>,
    dir: TempDir,
}

impl Registry {
    fn new() -> Self {
        let bus = Bus::new();
        let client = Arc::new(Mailbox::with_capacity([CLIENT_TOPIC], 1024));
        bus.subscribe(Arc::clone(&client));
        let server = DownloadServer::new(Arc::clone(&bus), CLIENT_TOPIC, fast_worker_config());
        Self {
            bus,
            server,
            client,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn directory(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    fn create(&self, url: &str) {
        self.bus
            .publish(Message::create_download(SERVER_TOPIC, url, self.directory()));
    }

    fn operate(&self, download_id: u64, operation: DownloadOperation) {
        self.bus
            .publish(Message::operation(SERVER_TOPIC, download_id, operation));
    }

    /// 在测试线程上驱动注册中心，直到前端收到满足条件的消息
    fn pump_until(&mut self, mut done: impl FnMut(&Message) -> bool) -> Vec<Message> {
        let deadline = Instant::now() + TIMEOUT;
        let mut collected = Vec::new();
        loop {
            self.server.process_pending();
            for message in self.client.drain() {
                let finished = done(&message);
                collected.push(message);
                if finished {
                    return collected;
                }
            }
            assert!(Instant::now() < deadline, "等待前端消息超时: {:?}", collected);
            self.server.wait_timeout(Duration::from_millis(20));
        }
    }
}

fn info_of(message: &Message) -> Option<&Download> {
    match message.payload() {
        Payload::DownloadInfo(download) => Some(download),
        _ => None,
    }
}

#[test]
fn test_full_download_through_registry() {
    let body = sample_body(5_000);
    let files = FileServer::start(FixtureOptions::new(body.clone()));
    let mut registry = Registry::new();
    let url = files.url("f.bin");

    registry.create(&url);
    let announced = registry.pump_until(|m| info_of(m).is_some());
    let info = info_of(announced.last().unwrap()).unwrap().clone();
    assert_eq!(info.download_id, 1);
    assert_eq!(info.size, 5_000);
    assert_eq!(info.filename, "f.bin");
    assert_eq!(registry.server.next_id(), 2);
    assert_eq!(registry.server.downloads().get(&1), Some(&info));

    registry.operate(1, DownloadOperation::Start);
    let messages = registry.pump_until(is_terminal_status);
    let last = snapshots(&messages).pop().unwrap();
    assert_eq!(last.status, DownloadStatus::Completed);
    assert_eq!(last.progress, 1.0);

    // 终止之后移出注册表
    assert!(registry.server.downloads().is_empty());
    assert!(registry.server.statuses().is_empty());
    assert!(!registry.server.is_tracked(1));
    assert_eq!(fs::read(registry.dir.path().join("f.bin")).unwrap(), body);

    // 对已移除的 ID 的操作没有任何效果
    registry.operate(1, DownloadOperation::Start);
    registry.server.process_pending();
    assert!(registry.client.is_empty());
}

#[test]
fn test_ids_are_allocated_in_order() {
    let files = FileServer::start(FixtureOptions::new(sample_body(5_000)));
    let mut registry = Registry::new();

    registry.create(&files.url("a.bin"));
    registry.create(&files.url("b.bin"));
    let mut seen = Vec::new();
    registry.pump_until(|m| {
        if let Some(info) = info_of(m) {
            seen.push((info.download_id, info.filename.clone()));
        }
        seen.len() == 2
    });
    seen.sort();
    assert_eq!(seen, vec![(1, "a.bin".to_string()), (2, "b.bin".to_string())]);
    assert_eq!(registry.server.next_id(), 3);

    for id in [1, 2] {
        registry.operate(id, DownloadOperation::Cancel);
    }
    let mut finished = 0;
    registry.pump_until(|m| {
        if is_terminal_status(m) {
            finished += 1;
        }
        finished == 2
    });
    assert!(registry.server.downloads().is_empty());
}

#[test]
fn test_duplicate_create_is_ignored_while_active() {
    let files = FileServer::start(FixtureOptions::new(sample_body(5_000)));
    let mut registry = Registry::new();
    let url = files.url("f.bin");

    registry.create(&url);
    registry.create(&url);
    registry.server.process_pending();
    assert_eq!(registry.server.next_id(), 2);
    // 前端、注册中心和唯一的工作线程
    assert_eq!(registry.bus.subscriber_count(), 3);

    registry.operate(1, DownloadOperation::Cancel);
    registry.pump_until(is_terminal_status);

    // 结束之后同一 URL 可以重新创建，得到新的 ID
    registry.create(&url);
    let announced = registry.pump_until(|m| info_of(m).is_some());
    assert_eq!(info_of(announced.last().unwrap()).unwrap().download_id, 2);
    registry.operate(2, DownloadOperation::Cancel);
    registry.pump_until(is_terminal_status);
}

#[test]
fn test_unreachable_url_reports_error_and_is_evicted() {
    let mut options = FixtureOptions::new(Vec::new());
    options.head_status = 500;
    let files = FileServer::start(options);
    let mut registry = Registry::new();
    let url = files.url("broken.bin");

    registry.create(&url);
    let messages = registry.pump_until(is_terminal_status);

    let info = messages.iter().find_map(info_of).unwrap();
    assert_eq!(info.filename, url);
    assert_eq!(snapshots(&messages).pop().unwrap().status, DownloadStatus::Error);
    assert!(!registry.server.is_tracked(1));
}

#[test]
fn test_reports_from_untracked_ids_are_not_relayed() {
    let mut registry = Registry::new();
    let stray = Download::new(42, "http://h/x", "/tmp", 1, "x", false);
    registry
        .bus
        .publish(Message::new(SERVER_TOPIC, Payload::DownloadInfo(stray)));
    registry.server.process_pending();

    assert!(registry.client.is_empty());
    assert!(registry.server.downloads().is_empty());
}

#[test]
fn test_spawned_registry_serves_until_shutdown() {
    let files = FileServer::start(FixtureOptions::new(sample_body(3_000)));
    let bus = Bus::new();
    let client = Arc::new(Mailbox::with_capacity([CLIENT_TOPIC], 1024));
    bus.subscribe(Arc::clone(&client));
    let dir = tempfile::tempdir().unwrap();
    let handle = DownloadServer::new(Arc::clone(&bus), CLIENT_TOPIC, fast_worker_config())
        .spawn()
        .unwrap();

    bus.publish(Message::create_download(
        SERVER_TOPIC,
        files.url("f.bin"),
        dir.path().to_string_lossy(),
    ));
    let announced = common::collect_until(&client, TIMEOUT, |m| info_of(m).is_some());
    let id = info_of(announced.last().unwrap()).unwrap().download_id;

    bus.publish(Message::operation(SERVER_TOPIC, id, DownloadOperation::Start));
    let messages = common::collect_until(&client, TIMEOUT, is_terminal_status);
    assert_eq!(snapshots(&messages).pop().unwrap().status, DownloadStatus::Completed);

    handle.shutdown();
    // 注册中心与已结束的工作线程都会退订，只剩前端
    let deadline = Instant::now() + TIMEOUT;
    while bus.subscriber_count() > 1 {
        assert!(Instant::now() < deadline, "订阅未被释放");
        std::thread::sleep(Duration::from_millis(10));
    }
}
