use std::io;
use thiserror::Error;

/// 单个下载在解析或传输阶段的错误
///
/// 这些错误不会跨越线程边界传播：工作线程会把它们转换成 `status=ERROR` 的状态消息。
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] io::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("服务器未返回 Content-Length: {0}")]
    MissingContentLength(String),

    #[error("服务器错误: {0}")]
    ServerError(String),

    #[error("外部管道执行失败: {0}")]
    PipelineFailed(String),

    #[error("外部管道输出无法解析: {0}")]
    PipelineOutput(#[from] serde_json::Error),
}

/// 消息信封编解码错误
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("消息必须是 JSON 对象")]
    NotAnObject,

    #[error("消息缺少必需字段: {0}")]
    MissingField(&'static str),

    #[error("动作 {action} 的负载无效: {source}")]
    InvalidPayload {
        action: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON 编解码失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 网络桥接错误；连接断开后该桥接实例即永久停止
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("消息编码失败: {0}")]
    Encode(#[from] MessageError),
}

/// 配置文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("无法读写配置文件 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("无法序列化配置: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("配置无效: {0}")]
    Invalid(String),
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_display() {
        let missing = DownloadError::MissingContentLength("http://h/f.bin".to_string());
        assert_eq!(missing.to_string(), "服务器未返回 Content-Length: http://h/f.bin");

        let io_error = DownloadError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(io_error, DownloadError::IoError(_)));
    }

    #[test]
    fn test_error_display() {
        let error = MessageError::MissingField("topic");
        assert_eq!(error.to_string(), "消息缺少必需字段: topic");

        let error = ConfigError::Invalid("分块大小必须大于0".to_string());
        assert!(error.to_string().contains("分块大小"));
    }
}
