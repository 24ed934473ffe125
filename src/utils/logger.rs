use chrono::Local; // 用于获取本地时间
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// 带大小轮转的文件日志
///
/// 超过 `max_size` 后，当前文件被重命名为 `<path>.backup`（覆盖旧的备份），再新建文件继续写。
pub struct FileLogger {
    inner: Mutex<LogFile>,
    level: LevelFilter,
}

struct LogFile {
    writer: BufWriter<File>,
    file_path: String,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl LogFile {
    fn open(file_path: &str) -> std::io::Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((BufWriter::new(file), size))
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> std::io::Result<()> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = format!("{}.backup", self.file_path);
        if Path::new(&backup_path).exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        let (writer, size) = Self::open(&self.file_path)?;
        self.writer = writer;
        self.current_size = size;
        Ok(())
    }

    fn write_entry(&mut self, entry: &str) -> std::io::Result<()> {
        self.check_rotation()?;
        self.writer.write_all(entry.as_bytes())?;
        self.current_size += entry.len() as u64;
        self.writer.flush()
    }
}

impl FileLogger {
    pub fn new(file_path: &str, level: LevelFilter, max_size: u64) -> std::io::Result<Self> {
        // 确保日志目录存在
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (writer, current_size) = LogFile::open(file_path)?;
        Ok(Self {
            inner: Mutex::new(LogFile {
                writer,
                file_path: file_path.to_string(),
                max_size,
                current_size,
            }),
            level,
        })
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = format!(
            "{} [{}] {} - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        );
        let mut file = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_entry(&entry) {
            eprintln!("日志写入失败: {}", e);
        }
    }

    fn flush(&self) {
        let mut file = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = file.writer.flush();
    }
}

/// 安装全局日志：配置了日志文件时写文件，否则交给 env_logger 输出到终端
pub fn init(log_file: Option<&str>, level: &str, max_size: u64) -> anyhow::Result<()> {
    let filter: LevelFilter = level
        .parse()
        .map_err(|_| anyhow::anyhow!("无效的日志级别: {}", level))?;
    match log_file {
        Some(path) => {
            let logger = FileLogger::new(path, filter, max_size)?;
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(filter);
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
                .try_init()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn record_at<'a>(level: Level, args: std::fmt::Arguments<'a>) -> Record<'a> {
        Record::builder().level(level).target("relaydown").args(args).build()
    }

    #[test]
    fn test_file_logger_filters_by_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let path = path.to_str().unwrap();
        let logger = FileLogger::new(path, LevelFilter::Info, 1024 * 1024).unwrap();

        logger.log(&record_at(Level::Info, format_args!("程序启动")));
        logger.log(&record_at(Level::Debug, format_args!("调试信息")));
        logger.flush();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("[INFO] relaydown - 程序启动"));
        assert!(!content.contains("调试信息"));
    }

    #[test]
    fn test_file_logger_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let path = path.to_str().unwrap();
        let logger = FileLogger::new(path, LevelFilter::Info, 64).unwrap();

        for i in 0..10 {
            logger.log(&record_at(Level::Warn, format_args!("第 {} 条日志", i)));
        }
        logger.flush();

        let backup = format!("{}.backup", path);
        assert!(Path::new(&backup).exists());
        let current = std::fs::metadata(path).unwrap().len();
        assert!(current < 64 * 2);
    }
}
