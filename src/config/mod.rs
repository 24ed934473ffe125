use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::Args;
use crate::core::error::ConfigError;
use crate::core::worker::{WorkerConfig, CHUNK_SIZE};
use crate::messaging::bridge::BridgeConfig;
use crate::messaging::mailbox::DEFAULT_CAPACITY;
use crate::messaging::{CLIENT_TOPIC, SERVER_TOPIC};

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 每个邮箱的容量，满了丢弃新消息
    pub mailbox_capacity: usize,
    /// 每次读取的分块大小（字节）
    pub chunk_size: usize,
    /// 状态上报间隔（毫秒）
    pub update_interval_ms: u64,
    /// 元数据探测超时（秒）
    pub probe_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 注册中心主题
    pub server_topic: String,
    /// 前端主题
    pub client_topic: String,
    /// 桥接监听地址
    pub host: String,
    /// 桥接监听端口
    pub port: u16,
    /// 桥接出站轮询间隔（毫秒）
    pub bridge_poll_interval_ms: u64,
    /// 外部提取程序
    pub pipeline_program: String,
    /// 交给外部提取程序处理的站点
    pub pipeline_hosts: Vec<String>,
    /// 日志文件，留空则输出到终端
    pub log_file: Option<String>,
    /// 日志级别
    pub log_level: String,
    /// 日志文件最大大小（字节）
    pub log_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            download_dir: "./downloads".to_string(),
            mailbox_capacity: DEFAULT_CAPACITY,
            chunk_size: CHUNK_SIZE,
            update_interval_ms: worker.update_interval.as_millis() as u64,
            probe_timeout: worker.probe_timeout.as_secs(),
            user_agent: worker.user_agent,
            server_topic: SERVER_TOPIC.to_string(),
            client_topic: CLIENT_TOPIC.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8765,
            bridge_poll_interval_ms: 20,
            pipeline_program: worker.pipeline_program,
            pipeline_hosts: worker.pipeline_hosts,
            log_file: None,
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入默认配置；格式错误时回退到默认配置并重写文件
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            return Ok(config);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                let config = Config::default();
                config.save_with_tutorial(path)?;
                Ok(config)
            }
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let config_content = toml::to_string_pretty(self)?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content).map_err(io_error)?;
        Ok(())
    }

    /// 生成配置文件教程内容（全部为注释）
    fn generate_tutorial_content() -> &'static str {
        r#"# relaydown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件。缺省的键使用默认值。
#
# 配置文件位置：
# - Windows: %APPDATA%/relaydown/relaydown.toml
# - macOS: ~/Library/Application Support/relaydown/relaydown.toml
# - Linux: ~/.config/relaydown/relaydown.toml
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   relaydown get https://example.com/file.zip               # 本地下载
#   relaydown serve --port 8765                              # 启动下载服务，等待远程前端
#   relaydown remote ws://host:8765 https://example.com/a.zip # 通过远程服务下载
#   relaydown -e                                             # 编辑配置文件
#
# ==================== 配置项说明 ====================
#
# download_dir            默认下载目录
# mailbox_capacity        每个邮箱的容量，满了之后新消息被丢弃
# chunk_size              每次读取的分块大小（字节），默认 102400
# update_interval_ms      状态上报与暂停/取消检查的间隔（毫秒）
# probe_timeout           元数据探测超时（秒）
# user_agent              HTTP User-Agent
# server_topic            注册中心主题，两端必须一致
# client_topic            前端主题，两端必须一致，且不能与 server_topic 相同
# host / port             serve 模式的监听地址
# bridge_poll_interval_ms 桥接出站轮询间隔（毫秒）
# pipeline_program        外部提取程序（yt-dlp 兼容）
# pipeline_hosts          交给外部提取程序处理的站点
# log_file                日志文件路径，不设置则输出到终端
# log_level               日志级别：error / warn / info / debug / trace
# log_max_size            日志文件超过该大小（字节）后轮转为 .backup
#
# ==================== 故障排除 ====================
#
# 问题：远程前端收不到进度
# 解决：确认两端的 server_topic / client_topic 一致
#
# 问题：视频站点下载失败
# 解决：确认 pipeline_program 已安装并在 PATH 中
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(reason.to_string()))
        };

        if self.download_dir.is_empty() {
            return invalid("下载目录不能为空");
        }
        if self.mailbox_capacity == 0 {
            return invalid("邮箱容量必须大于0");
        }
        if self.chunk_size == 0 {
            return invalid("分块大小必须大于0");
        }
        if self.update_interval_ms == 0 {
            return invalid("状态上报间隔必须大于0");
        }
        if self.probe_timeout == 0 {
            return invalid("探测超时必须大于0");
        }
        if self.bridge_poll_interval_ms == 0 {
            return invalid("桥接轮询间隔必须大于0");
        }
        if self.server_topic.is_empty() || self.client_topic.is_empty() {
            return invalid("主题不能为空");
        }
        if self.server_topic == self.client_topic {
            return invalid("注册中心主题与前端主题不能相同");
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return invalid("无效的日志级别");
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &Args) {
        if let Some(download_dir) = &args.download_dir {
            self.download_dir = download_dir.clone();
        }
        if let Some(log_file) = &args.log_file {
            self.log_file = Some(log_file.clone());
        }
        if let Some(log_level) = &args.log_level {
            self.log_level = log_level.clone();
        }
        let (host, port) = args.listen_override();
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            server_topic: self.server_topic.clone(),
            mailbox_capacity: self.mailbox_capacity,
            chunk_size: self.chunk_size,
            update_interval: Duration::from_millis(self.update_interval_ms),
            probe_timeout: Duration::from_secs(self.probe_timeout),
            user_agent: self.user_agent.clone(),
            pipeline_program: self.pipeline_program.clone(),
            pipeline_hosts: self.pipeline_hosts.clone(),
        }
    }

    /// 桥接配置；`remote_topic` 是需要送往对端的主题
    pub fn bridge_config(&self, remote_topic: &str) -> BridgeConfig {
        BridgeConfig {
            remote_topic: remote_topic.to_string(),
            poll_interval: Duration::from_millis(self.bridge_poll_interval_ms),
            capacity: self.mailbox_capacity,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 分块大小: {} 字节\n\
            - 上报间隔: {} 毫秒\n\
            - 探测超时: {} 秒\n\
            - 主题: {} / {}\n\
            - 监听地址: {}\n\
            - 外部提取程序: {}\n\
            - 日志: {}",
            self.download_dir,
            self.chunk_size,
            self.update_interval_ms,
            self.probe_timeout,
            self.server_topic,
            self.client_topic,
            self.listen_addr(),
            self.pipeline_program,
            match &self.log_file {
                Some(path) => format!("{} ({})", path, self.log_level),
                None => format!("终端 ({})", self.log_level),
            }
        )
    }
}
