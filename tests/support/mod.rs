#![allow(dead_code)]

use serde_json::Value;
use std::path::PathBuf;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PASSWORD: &str = "hunter2";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_json_fixture(name: &str) -> Value {
    let text = std::fs::read_to_string(fixture_path(name)).expect("fixture should exist");
    serde_json::from_str(&text).expect("fixture should be valid json")
}

pub async fn mount_chat_query(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/query"))
        .and(query_param("password", PASSWORD))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_messages(server: &MockServer, chat_id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/chat/{chat_id}/message")))
        .and(query_param("password", PASSWORD))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
