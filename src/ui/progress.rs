use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;

use crate::core::download::{Download, DownloadStatus, StatusSnapshot};

const BAR_TEMPLATE: &str = "{prefix:>4} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}";

// 结构体：ProgressManager
// 按下载 ID 管理进度条
pub struct ProgressManager {
    multi: MultiProgress,
    progress_bars: HashMap<u64, ProgressBar>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            progress_bars: HashMap::new(),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }

    /// 收到下载信息时创建进度条；已存在则只更新总大小
    pub fn add_download(&mut self, download: &Download) {
        if let Some(pb) = self.progress_bars.get(&download.download_id) {
            pb.set_length(download.size);
            return;
        }
        let pb = self.multi.add(ProgressBar::new(download.size));
        pb.set_style(Self::style());
        pb.set_prefix(format!("#{}", download.download_id));
        pb.set_message(download.filename.clone());
        self.progress_bars.insert(download.download_id, pb);
    }

    // 方法：更新下载进度
    pub fn update_progress(&self, snapshot: &StatusSnapshot) {
        let Some(pb) = self.progress_bars.get(&snapshot.download_id) else {
            return;
        };
        pb.set_position(snapshot.downloaded_bytes);

        let status = match snapshot.status {
            DownloadStatus::InProgress => {
                let speed = snapshot.speed.max(0.0) as u64;
                let total = pb.length().unwrap_or(0);
                // 计算剩余时间
                let eta = if speed > 0 && total > snapshot.downloaded_bytes {
                    let seconds = (total - snapshot.downloaded_bytes) / speed;
                    if seconds > 3600 {
                        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
                    } else if seconds > 60 {
                        format!("{}m{}s", seconds / 60, seconds % 60)
                    } else {
                        format!("{}s", seconds)
                    }
                } else {
                    "未知".to_string()
                };
                format!(
                    "{:.0}% | {}/s | ETA:{}",
                    snapshot.progress * 100.0,
                    HumanBytes(speed),
                    eta
                )
            }
            DownloadStatus::Unstarted => "等待开始".to_string(),
            DownloadStatus::Paused => "已暂停".to_string(),
            DownloadStatus::Completed => "✓ 完成".to_string(),
            DownloadStatus::Canceled => "已取消".to_string(),
            DownloadStatus::Error => "✗ 失败".to_string(),
        };

        if snapshot.status.is_terminal() {
            pb.finish_with_message(status);
        } else {
            pb.set_message(status);
        }
    }

    /// 在进度条上方打印一行，不打乱进度条
    pub fn println(&self, line: &str) {
        if self.multi.println(line).is_err() {
            println!("{}", line);
        }
    }

    pub fn finish(&self) {
        for pb in self.progress_bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.progress_bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress_bars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_keyed_by_download_id() {
        let mut manager = ProgressManager::new();
        let download = Download::new(1, "http://h/f.bin", ".", 100, "f.bin", true);
        manager.add_download(&download);
        manager.add_download(&Download { size: 200, ..download.clone() });
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.progress_bars[&1].length(), Some(200));

        manager.update_progress(&StatusSnapshot::new(1, DownloadStatus::InProgress, 50, 200, 10.0));
        assert_eq!(manager.progress_bars[&1].position(), 50);

        manager.update_progress(&StatusSnapshot::new(1, DownloadStatus::Completed, 200, 200, 0.0));
        assert!(manager.progress_bars[&1].is_finished());

        // 未知 ID 的状态被忽略
        manager.update_progress(&StatusSnapshot::new(9, DownloadStatus::InProgress, 1, 2, 1.0));
        assert_eq!(manager.len(), 1);
    }
}
