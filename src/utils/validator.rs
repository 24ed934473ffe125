use anyhow::Result;
use url::Url;

/// Windows 与类 Unix 文件系统都不接受的字符
const FORBIDDEN_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    if let Some(invalid) = urls.iter().find(|url| !is_valid_url(url)) {
        anyhow::bail!("无效的URL: {}", invalid);
    }
    Ok(())
}

pub fn validate_bridge_uri(uri: &str) -> Result<()> {
    match Url::parse(uri) {
        Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => Ok(()),
        _ => anyhow::bail!("无效的桥接地址（需要 ws:// 或 wss://）: {}", uri),
    }
}

/// 把任意标题变成可用的文件名
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}
