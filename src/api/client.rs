use crate::api::models::{Chat, Message};
use crate::error::ApiError;
use crate::utils::normalize_url;
use log::debug;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ApiClient {
    http: HttpClient,
    base_url: Url,
    password: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, password: &str) -> Result<Self, ApiError> {
        let http = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_http(http, base_url, password)
    }

    pub fn with_http(http: HttpClient, base_url: &str, password: &str) -> Result<Self, ApiError> {
        let normalized = normalize_url(base_url);
        // Users paste either the server root or its /api prefix.
        let root = normalized.strip_suffix("/api").unwrap_or(&normalized);
        let base_url = Url::parse(root)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Payload {
                endpoint: root.to_string(),
                reason: "server url cannot carry a path".into(),
            });
        }
        Ok(Self {
            http,
            base_url,
            password: password.to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    fn with_auth(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        if !self.password.is_empty() {
            req = req.query(&[("password", self.password.as_str())]);
        }
        req
    }

    async fn read_json(endpoint: &Url, resp: Response) -> Result<Value, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.path().to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Reach the server's ping endpoint, returning the HTTP status code.
    pub async fn ping(&self) -> Result<u16, ApiError> {
        let endpoint = self.endpoint(&["ping"]);
        let resp = self.with_auth(self.http.get(endpoint)).send().await?;
        Ok(resp.status().as_u16())
    }

    /// Fetch the chat list, newest activity first. Entries without an id are
    /// dropped.
    pub async fn chats(&self, limit: usize) -> Result<Vec<Chat>, ApiError> {
        let endpoint = self.endpoint(&["chat", "query"]);
        let body = serde_json::json!({
            "limit": limit,
            "offset": 0,
            "with": ["lastMessage", "sms", "archived"],
            "sort": "lastmessage"
        });
        let resp = self
            .with_auth(self.http.post(endpoint.clone()).json(&body))
            .send()
            .await?;
        let json = Self::read_json(&endpoint, resp).await?;
        let items = list_items(json, "chats");

        let chats: Vec<Chat> = items.iter().filter_map(Chat::from_value).collect();
        if chats.len() < items.len() {
            debug!("skipped {} chat entries without an id", items.len() - chats.len());
        }
        Ok(chats)
    }

    pub async fn messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>, ApiError> {
        let endpoint = self.endpoint(&["chat", chat_id, "message"]);
        let limit = limit.to_string();
        let req = self
            .http
            .get(endpoint.clone())
            .query(&[("limit", limit.as_str()), ("sort", "DESC")]);
        let resp = self.with_auth(req).send().await?;
        let json = Self::read_json(&endpoint, resp).await?;
        Ok(list_items(json, "messages")
            .iter()
            .map(Message::from_value)
            .collect())
    }

    /// Send a text and return the server's copy of it. `temp_id` is echoed
    /// back by the server and is usually the optimistic placeholder's id.
    pub async fn send_text(&self, chat_id: &str, text: &str, temp_id: &str) -> Result<Message, ApiError> {
        let endpoint = self.endpoint(&["message", "text"]);
        let body = serde_json::json!({
            "chatGuid": chat_id,
            "tempGuid": temp_id,
            "message": text,
        });
        let resp = self
            .with_auth(self.http.post(endpoint.clone()).json(&body))
            .send()
            .await?;
        let json = Self::read_json(&endpoint, resp).await?;
        let sent = Message::from_value(json.get("data").unwrap_or(&json));
        if sent.id.is_none() {
            return Err(ApiError::Payload {
                endpoint: endpoint.path().to_string(),
                reason: "no message guid in response".into(),
            });
        }
        Ok(sent)
    }
}

// Servers answer with a bare array, `{data: [...]}` or `{<key>: [...]}`.
fn list_items(json: Value, key: &str) -> Vec<Value> {
    match json {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data").or_else(|| obj.remove(key)) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_suffix_is_folded_into_base() {
        let client = ApiClient::new("myserver:1234/api/", "pw").expect("valid url");
        assert_eq!(client.base_url().as_str(), "https://myserver:1234/");
        assert_eq!(
            client.endpoint(&["chat", "query"]).as_str(),
            "https://myserver:1234/api/v1/chat/query"
        );
    }

    #[test]
    fn chat_guid_is_percent_encoded_in_path() {
        let client = ApiClient::new("https://host", "pw").expect("valid url");
        let url = client.endpoint(&["chat", "iMessage;-;chat 1/2", "message"]);
        assert_eq!(url.path(), "/api/v1/chat/iMessage;-;chat%201%2F2/message");
    }

    #[test]
    fn list_items_accepts_known_envelopes() {
        assert_eq!(list_items(json!([1, 2]), "chats").len(), 2);
        assert_eq!(list_items(json!({"data": [1]}), "chats").len(), 1);
        assert_eq!(list_items(json!({"chats": [1, 2, 3]}), "chats").len(), 3);
        assert!(list_items(json!({"status": 200}), "chats").is_empty());
    }

    #[test]
    fn garbage_url_is_rejected() {
        assert!(ApiClient::new("http://exa mple.com", "pw").is_err());
    }
}
