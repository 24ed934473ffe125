//! 基于 HTTP 字节范围的传输策略

use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use url::Url;

use super::strategy::{Checkpoint, CheckpointFn, Resolved, TransferEnd, TransferStrategy};
use super::WorkerConfig;
use crate::core::download::Download;
use crate::core::error::{DownloadError, DownloadResult};

/// 无法推断文件名时使用的名字
const FALLBACK_FILENAME: &str = "download";

pub struct HttpTransfer {
    client: Client,
    chunk_size: usize,
    update_interval: Duration,
    probe_timeout: Duration,
}

impl HttpTransfer {
    pub fn new(config: &WorkerConfig) -> DownloadResult<Self> {
        // 传输本身不设超时，只有探测请求有
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            chunk_size: config.chunk_size,
            update_interval: config.update_interval,
            probe_timeout: config.probe_timeout,
        })
    }

    fn open_stream(&self, download: &Download, offset: u64) -> DownloadResult<Response> {
        let mut request = self.client.get(&download.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(DownloadError::ServerError(response.status().to_string()));
        }
        Ok(response)
    }
}

impl TransferStrategy for HttpTransfer {
    fn resolve(&self, url: &str) -> DownloadResult<Resolved> {
        Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        let response = self.client.head(url).timeout(self.probe_timeout).send()?;
        if !response.status().is_success() {
            return Err(DownloadError::ServerError(response.status().to_string()));
        }
        let headers = response.headers();

        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| DownloadError::MissingContentLength(url.to_string()))?;

        let filename = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        let is_pausable = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        log::debug!(
            "探测完成: {} 大小 {} 文件名 {} 可续传 {}",
            url,
            size,
            filename,
            is_pausable
        );
        Ok(Resolved {
            size,
            filename,
            is_pausable,
        })
    }

    fn transfer(
        &mut self,
        download: &Download,
        offset: u64,
        checkpoint: &mut CheckpointFn<'_>,
    ) -> DownloadResult<TransferEnd> {
        let mut response = self.open_stream(download, offset)?;

        let append = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !append {
            log::warn!("{} 未按 Range 返回部分内容，从头重新下载", download.url);
        }
        let mut downloaded = if append { offset } else { 0 };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(download.path())?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut interval_start = Instant::now();
        let mut interval_bytes = 0u64;

        loop {
            let read = read_chunk(&mut response, &mut buffer)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])?;
            downloaded += read as u64;
            interval_bytes += read as u64;

            let elapsed = interval_start.elapsed();
            if elapsed < self.update_interval {
                continue;
            }
            if downloaded == download.size {
                break;
            }
            let speed = interval_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            let progress = Checkpoint {
                downloaded_bytes: downloaded,
                total_bytes: download.size,
                speed,
            };
            if checkpoint(progress).is_break() {
                file.flush()?;
                return Ok(TransferEnd::Stopped {
                    downloaded_bytes: downloaded,
                });
            }
            interval_bytes = 0;
            interval_start = Instant::now();
        }

        // 已读满时流里可能还有剩余，读到结束为止
        if downloaded == download.size {
            loop {
                let read = read_chunk(&mut response, &mut buffer)?;
                if read == 0 {
                    break;
                }
                file.write_all(&buffer[..read])?;
                downloaded += read as u64;
            }
        }
        file.flush()?;
        Ok(TransferEnd::Finished {
            downloaded_bytes: downloaded,
            total_bytes: download.size,
        })
    }
}

/// 读满一个分块，流结束时返回不足一块的长度
fn read_chunk(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// 从 `Content-Disposition` 中提取文件名，只保留最后一段
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let pattern = Regex::new(r#"filename="(.+?)""#).ok()?;
    let raw = pattern.captures(value)?.get(1)?.as_str();
    basename(raw)
}

/// 取 URL 路径的最后一段
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    if segment.is_empty() {
        return None;
    }
    basename(&segment)
}

fn basename(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="report.pdf""#),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="C:\temp\a.zip""#),
            Some("a.zip".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/path/to/file.zip"),
            Some("file.zip".to_string())
        );
        assert_eq!(
            filename_from_url("https://example.com/file.txt?token=1"),
            Some("file.txt".to_string())
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
        assert_eq!(filename_from_url("not a url"), None);
    }

    #[test]
    fn test_read_chunk_fills_buffer() {
        let data = vec![7u8; 25];
        let mut reader = io::Cursor::new(data);
        let mut buffer = [0u8; 10];
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 10);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 10);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 5);
        assert_eq!(read_chunk(&mut reader, &mut buffer).unwrap(), 0);
    }
}
