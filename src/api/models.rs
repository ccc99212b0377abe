use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Keys that `Chat::from_value` maps onto typed fields. Anything else in the
/// payload lands in `Chat::extra`.
const CHAT_FIELDS: [&str; 12] = [
    "id",
    "guid",
    "name",
    "displayName",
    "display_name",
    "title",
    "lastMessage",
    "timestamp",
    "lastMessageTimestamp",
    "unreadCount",
    "unread_count",
    "isTyping",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Chat {
    pub fn new(id: impl Into<String>, name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            last_message: String::new(),
            timestamp,
            unread_count: 0,
            is_typing: false,
            extra: Map::new(),
        }
    }

    /// Build a chat from a server payload. Entries without a usable id are
    /// rejected so they can be skipped instead of failing the whole page.
    pub fn from_value(item: &Value) -> Option<Self> {
        let id = item
            .get("id")
            .or_else(|| item.get("guid"))
            .and_then(id_string)?;

        let name = item
            .get("name")
            .or_else(|| item.get("displayName"))
            .or_else(|| item.get("display_name"))
            .or_else(|| item.get("title"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Chat")
            .to_string();

        let last = item.get("lastMessage");
        let last_message = match last {
            Some(Value::String(s)) => s.clone(),
            Some(obj @ Value::Object(_)) => Message::from_value(obj).text,
            _ => String::new(),
        };

        let timestamp = item
            .get("timestamp")
            .or_else(|| item.get("lastMessageTimestamp"))
            .and_then(timestamp_value)
            .or_else(|| {
                last.filter(|v| v.is_object())
                    .map(|v| Message::from_value(v).timestamp)
            })
            .unwrap_or(0);

        let unread_count = item
            .get("unreadCount")
            .or_else(|| item.get("unread_count"))
            .and_then(|v| v.as_u64())
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0);

        let is_typing = item.get("isTyping").and_then(|v| v.as_bool()).unwrap_or(false);

        let extra = item
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !CHAT_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id,
            name,
            last_message,
            timestamp,
            unread_count,
            is_typing,
            extra,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical message record. Both the provider-native shape
/// (`{key:{id,fromMe}, message:{..}, messageTimestamp}`) and the simplified
/// shape (`{id, fromMe, text, timestamp, status}`) normalize into this, so the
/// dedup logic never looks at raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    pub text: String,
    pub from_me: bool,
    /// Seconds. Missing timestamps are 0.
    pub timestamp: i64,
    pub status: Option<MessageStatus>,
    pub raw: Value,
}

impl Message {
    pub fn local(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        let id = id.into();
        let text = text.into();
        let raw = serde_json::json!({
            "id": id,
            "fromMe": true,
            "text": text,
            "timestamp": timestamp,
            "status": MessageStatus::Sending.as_str(),
        });
        Self {
            id: Some(id),
            text,
            from_me: true,
            timestamp,
            status: Some(MessageStatus::Sending),
            raw,
        }
    }

    pub fn from_value(item: &Value) -> Self {
        let key = item.get("key");

        let id = key
            .and_then(|k| k.get("id"))
            .and_then(id_string)
            .or_else(|| item.get("id").and_then(id_string))
            .or_else(|| item.get("guid").and_then(id_string));

        let body = item.get("message");
        let text = [
            body.and_then(|m| m.get("extendedTextMessage"))
                .and_then(|m| m.get("text")),
            body.and_then(|m| m.get("conversation")),
            item.get("content"),
            item.get("text"),
        ]
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string();

        let from_me = key
            .and_then(|k| k.get("fromMe"))
            .or_else(|| item.get("fromMe"))
            .or_else(|| item.get("isFromMe"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // BlueBubbles reports dateCreated in milliseconds.
        let timestamp = item
            .get("messageTimestamp")
            .and_then(timestamp_value)
            .or_else(|| item.get("timestamp").and_then(timestamp_value))
            .or_else(|| item.get("dateCreated").and_then(timestamp_value).map(|ms| ms / 1000))
            .unwrap_or(0);

        let status = item
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(MessageStatus::parse);

        Self {
            id,
            text,
            from_me,
            timestamp,
            status,
            raw: item.clone(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.from_me && self.status == Some(MessageStatus::Sending)
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Accepts plain numbers, numeric strings and protobuf-style `{low, high}` longs.
fn timestamp_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Object(obj) => {
            let low = obj.get("low")?.as_i64()?;
            let high = obj.get("high").and_then(|h| h.as_i64()).unwrap_or(0);
            Some((high << 32) | (low & 0xffff_ffff))
        }
        _ => None,
    }
}
