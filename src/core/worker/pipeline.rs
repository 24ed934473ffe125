//! 外部提取程序（yt-dlp 兼容）驱动的传输策略
//!
//! 探测使用 `--dump-single-json`；传输时只取音轨并转码为 mp3，让程序按固定模板逐行打印进度，
//! 每行进度在间隔到达时触发一次检查点。提取程序没有其他中断方式，停止时直接结束子进程。
//!
//! 提取程序先把原始音轨写到 `{stem}.{ext}.part`，下载完成后转码为 `{stem}.mp3`，
//! 也就是 `Download::filepath`。

use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::strategy::{remove_if_exists, Checkpoint, CheckpointFn, Resolved, TransferEnd, TransferStrategy};
use super::WorkerConfig;
use crate::core::download::Download;
use crate::core::error::{DownloadError, DownloadResult};
use crate::utils::validator::sanitize_filename;

/// 进度行前缀，用来与提取程序的其他输出区分
const PROGRESS_MARKER: &str = "[relaydown]";
/// 只取音轨
const AUDIO_FORMAT: &str = "bestaudio/best";
/// 转码的目标格式与码率
const AUDIO_CODEC: &str = "mp3";
const AUDIO_QUALITY: &str = "192K";

#[derive(Debug, Deserialize)]
struct ProbeInfo {
    title: String,
    ext: String,
    filesize: Option<u64>,
    filesize_approx: Option<f64>,
}

/// 一行进度输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed: Option<f64>,
}

pub struct PipelineTransfer {
    program: String,
    probe_timeout: Duration,
    update_interval: Duration,
}

impl PipelineTransfer {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            program: config.pipeline_program.clone(),
            probe_timeout: config.probe_timeout,
            update_interval: config.update_interval,
        }
    }

    fn progress_template() -> String {
        format!(
            "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.speed)s",
            PROGRESS_MARKER
        )
    }

    /// 输出模板：原始音轨保留提取程序给出的扩展名，转码后落在 `filepath`
    fn output_template(download: &Download) -> String {
        Path::new(&download.download_directory)
            .join(format!("{}.%(ext)s", file_stem(download)))
            .to_string_lossy()
            .into_owned()
    }
}

fn file_stem(download: &Download) -> String {
    Path::new(&download.filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| download.filename.clone())
}

impl TransferStrategy for PipelineTransfer {
    fn resolve(&self, url: &str) -> DownloadResult<Resolved> {
        let output = Command::new(&self.program)
            .args(["--dump-single-json", "--no-playlist", "--no-warnings"])
            .args(["-f", AUDIO_FORMAT])
            .arg("--socket-timeout")
            .arg(self.probe_timeout.as_secs().max(1).to_string())
            .arg(url)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DownloadError::PipelineFailed(format!(
                "{} 探测失败 ({}): {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let info: ProbeInfo = serde_json::from_slice(&output.stdout)?;
        let size = info
            .filesize
            .or_else(|| info.filesize_approx.map(|approx| approx.max(0.0) as u64))
            .unwrap_or(0);
        Ok(Resolved {
            size,
            filename: format!("{}.{}", sanitize_filename(&info.title), AUDIO_CODEC),
            is_pausable: true,
        })
    }

    fn transfer(
        &mut self,
        download: &Download,
        offset: u64,
        checkpoint: &mut CheckpointFn<'_>,
    ) -> DownloadResult<TransferEnd> {
        // 续传由提取程序根据 .part 文件自行完成
        let mut child = Command::new(&self.program)
            .args(["--quiet", "--progress", "--newline", "--no-playlist", "--continue"])
            .args(["-f", AUDIO_FORMAT, "-x"])
            .args(["--audio-format", AUDIO_CODEC, "--audio-quality", AUDIO_QUALITY])
            .arg("--progress-template")
            .arg(Self::progress_template())
            .arg("-o")
            .arg(Self::output_template(download))
            .arg(&download.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::PipelineFailed("无法读取提取程序的输出".to_string()))?;

        let mut total = download.size;
        let mut last_checkpoint = Instant::now();
        log::debug!("下载 {} 交给 {}，已有 {} 字节", download.download_id, self.program, offset);

        for line in BufReader::new(stdout).lines() {
            let line = line?;
            let Some(progress) = parse_progress(&line) else {
                continue;
            };
            if let Some(total_bytes) = progress.total_bytes {
                total = total_bytes;
            }
            if last_checkpoint.elapsed() < self.update_interval {
                continue;
            }
            last_checkpoint = Instant::now();

            let flow = checkpoint(Checkpoint {
                downloaded_bytes: progress.downloaded_bytes,
                total_bytes: total,
                speed: progress.speed.unwrap_or(0.0),
            });
            if flow.is_break() {
                stop_child(&mut child);
                return Ok(TransferEnd::Stopped {
                    downloaded_bytes: progress.downloaded_bytes,
                });
            }
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(DownloadError::PipelineFailed(format!(
                "{} 下载失败 ({})",
                self.program, status
            )));
        }
        // 最终大小以转码后的文件为准
        let size = fs::metadata(download.path())
            .map_err(|e| {
                DownloadError::PipelineFailed(format!("找不到转码结果 {}: {}", download.filepath, e))
            })?
            .len();
        Ok(TransferEnd::Finished {
            downloaded_bytes: size,
            total_bytes: size,
        })
    }

    fn discard(&self, download: &Download) -> io::Result<()> {
        remove_if_exists(download.path())?;
        let prefix = format!("{}.", file_stem(download));
        let entries = match fs::read_dir(&download.download_directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && (name.ends_with(".part") || name.ends_with(".ytdl")) {
                remove_if_exists(entry.path())?;
            }
        }
        Ok(())
    }
}

fn stop_child(child: &mut std::process::Child) {
    if let Err(e) = child.kill() {
        log::warn!("结束提取程序失败: {}", e);
    }
    let _ = child.wait();
}

/// 解析一行进度；`NA` 或无法解析的字段记为缺失
pub fn parse_progress(line: &str) -> Option<PipelineProgress> {
    let mut fields = line.split_whitespace();
    if fields.next()? != PROGRESS_MARKER {
        return None;
    }
    let number = |field: Option<&str>| field.and_then(|s| s.parse::<f64>().ok()).filter(|n| *n >= 0.0);
    let downloaded = number(fields.next())?;
    let total = number(fields.next());
    let speed = number(fields.next());
    Some(PipelineProgress {
        downloaded_bytes: downloaded as u64,
        total_bytes: total.map(|t| t as u64),
        speed,
    })
}
