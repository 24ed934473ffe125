//! 消息信封
//!
//! 线上格式是一个扁平的 JSON 对象，必含 `topic` 与 `action` 两个键，其余键由动作决定：
//!
//! ```json
//! {"topic": "downloadserver", "action": "CreateDownload", "url": "http://h/f.bin", "download_directory": "."}
//! ```
//!
//! 已知动作被解码为 [`Payload`] 的对应变体；未知动作解码为显式的 [`Payload::Unrecognized`]。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::core::download::{Download, DownloadOperation, StatusSnapshot};
use crate::core::error::MessageError;

/// CreateDownload 动作的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDownload {
    pub url: String,
    pub download_directory: String,
}

/// DownloadOperation 动作的负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub download_id: u64,
    pub download_operation: DownloadOperation,
}

/// 按 `action` 区分的消息负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Payload {
    CreateDownload(CreateDownload),
    DownloadOperation(OperationRequest),
    DownloadInfo(Download),
    DownloadStatus(StatusSnapshot),
    /// 本端不认识的动作，原样保留其字段
    #[serde(skip)]
    Unrecognized {
        action: String,
        fields: Map<String, Value>,
    },
}

const KNOWN_ACTIONS: [&str; 4] = [
    "CreateDownload",
    "DownloadOperation",
    "DownloadInfo",
    "DownloadStatus",
];

impl Payload {
    pub fn action(&self) -> &str {
        match self {
            Payload::CreateDownload(_) => "CreateDownload",
            Payload::DownloadOperation(_) => "DownloadOperation",
            Payload::DownloadInfo(_) => "DownloadInfo",
            Payload::DownloadStatus(_) => "DownloadStatus",
            Payload::Unrecognized { action, .. } => action,
        }
    }
}

/// 在参与者之间传递的消息，发布后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Payload,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn create_download(
        topic: impl Into<String>,
        url: impl Into<String>,
        download_directory: impl Into<String>,
    ) -> Self {
        Self::new(
            topic,
            Payload::CreateDownload(CreateDownload {
                url: url.into(),
                download_directory: download_directory.into(),
            }),
        )
    }

    pub fn operation(topic: impl Into<String>, download_id: u64, operation: DownloadOperation) -> Self {
        Self::new(
            topic,
            Payload::DownloadOperation(OperationRequest {
                download_id,
                download_operation: operation,
            }),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn action(&self) -> &str {
        self.payload.action()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// 转发时只改写 `topic`，负载保持不变
    pub fn readdressed(&self, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: self.payload.clone(),
        }
    }

    pub fn to_value(&self) -> Result<Value, MessageError> {
        let mut fields = match &self.payload {
            Payload::Unrecognized { action, fields } => {
                let mut fields = fields.clone();
                fields.insert("action".to_string(), Value::String(action.clone()));
                fields
            }
            known => match serde_json::to_value(known)? {
                Value::Object(fields) => fields,
                _ => return Err(MessageError::NotAnObject),
            },
        };
        fields.insert("topic".to_string(), Value::String(self.topic.clone()));
        Ok(Value::Object(fields))
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut fields) = value else {
            return Err(MessageError::NotAnObject);
        };
        let topic = match fields.remove("topic") {
            Some(Value::String(topic)) => topic,
            _ => return Err(MessageError::MissingField("topic")),
        };
        let action = match fields.get("action") {
            Some(Value::String(action)) => action.clone(),
            _ => return Err(MessageError::MissingField("action")),
        };

        let payload = if KNOWN_ACTIONS.contains(&action.as_str()) {
            serde_json::from_value(Value::Object(fields))
                .map_err(|source| MessageError::InvalidPayload { action, source })?
        } else {
            fields.remove("action");
            Payload::Unrecognized { action, fields }
        };
        Ok(Self { topic, payload })
    }

    /// 编码为一个 JSON 文本帧
    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn decode_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::DownloadStatus;
    use serde_json::json;

    #[test]
    fn test_encode_is_flat_object() {
        let message = Message::operation("downloadworker7", 7, DownloadOperation::Pause);
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "topic": "downloadworker7",
                "action": "DownloadOperation",
                "download_id": 7,
                "download_operation": "PAUSE",
            })
        );
    }

    #[test]
    fn test_decode_status_message() {
        let text = r#"{"topic":"downloadclient","action":"DownloadStatus","download_id":2,
            "status":"IN_PROGRESS","downloaded_bytes":512,"progress":0.5,"speed":128.0}"#;
        let message = Message::decode(text).unwrap();
        assert_eq!(message.topic(), "downloadclient");
        match message.payload() {
            Payload::DownloadStatus(snapshot) => {
                assert_eq!(snapshot.download_id, 2);
                assert_eq!(snapshot.status, DownloadStatus::InProgress);
                assert_eq!(snapshot.downloaded_bytes, 512);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_action_keeps_fields() {
        let text = r#"{"topic":"downloadserver","action":"Shutdown","reason":"maintenance"}"#;
        let message = Message::decode(text).unwrap();
        assert_eq!(message.action(), "Shutdown");
        match message.payload() {
            Payload::Unrecognized { fields, .. } => {
                assert_eq!(fields.get("reason"), Some(&json!("maintenance")));
                assert!(!fields.contains_key("action"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(value["action"], "Shutdown");
        assert_eq!(value["reason"], "maintenance");
    }

    #[test]
    fn test_missing_envelope_fields() {
        assert!(matches!(
            Message::decode(r#"{"action":"CreateDownload"}"#),
            Err(MessageError::MissingField("topic"))
        ));
        assert!(matches!(
            Message::decode(r#"{"topic":"downloadserver"}"#),
            Err(MessageError::MissingField("action"))
        ));
        assert!(matches!(Message::decode("[1,2]"), Err(MessageError::NotAnObject)));
    }

    #[test]
    fn test_malformed_known_action_is_rejected() {
        let text = r#"{"topic":"downloadserver","action":"DownloadOperation","download_id":1,"download_operation":"RESTART"}"#;
        assert!(matches!(
            Message::decode(text),
            Err(MessageError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_readdressed_only_changes_topic() {
        let download = Download::new(1, "http://h/f.bin", ".", 10, "f.bin", true);
        let message = Message::new("downloadserver", Payload::DownloadInfo(download));
        let forwarded = message.readdressed("downloadclient");
        assert_eq!(forwarded.topic(), "downloadclient");
        assert_eq!(forwarded.payload(), message.payload());
    }

    #[test]
    fn test_serde_impl_matches_codec() {
        let message = Message::create_download("downloadserver", "http://h/f.bin", ".");
        let via_serde = serde_json::to_value(&message).unwrap();
        assert_eq!(via_serde, message.to_value().unwrap());
        let back: Message = serde_json::from_value(via_serde).unwrap();
        assert_eq!(back, message);
    }
}
