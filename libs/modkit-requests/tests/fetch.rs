//! End-to-end requests through `HyperTransport` against a local mock server.

use bytes::BytesMut;
use httpmock::prelude::*;
use modkit_requests::{
    DEFAULT_USER_AGENT, Error, HyperTransport, RequestBuilder, Slot, Stage, TransportConfig,
};
use serde::Deserialize;
use serde_json::json;
use std::io::Write as _;

fn transport() -> HyperTransport {
    HyperTransport::with_config(TransportConfig::for_testing()).unwrap()
}

fn builder(server: &MockServer) -> RequestBuilder {
    let mut rb = RequestBuilder::new();
    rb.base_url(server.base_url()).transport(transport());
    rb
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_get_json_with_params_and_headers() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/users")
            .query_param("name", "Ann Lee")
            .query_param("page", "2")
            .header("accept", "application/json")
            .header("authorization", "Bearer secret")
            .header("user-agent", DEFAULT_USER_AGENT);
        then.status(200)
            .header("content-type", "application/json; charset=utf-8")
            .json_body(json!({"id": 7, "name": "Ann Lee"}));
    });

    let user: Slot<Option<User>> = Slot::default();
    builder(&server)
        .path("/v1/users")
        .param("name", "Ann Lee")
        .param_int("page", 2)
        .accept("application/json")
        .bearer("secret")
        .check_status([200])
        .check_content_type(["application/json"])
        .to_json(&user)
        .fetch()
        .await
        .unwrap();

    m.assert();
    assert_eq!(
        user.take(),
        Some(User {
            id: 7,
            name: "Ann Lee".to_owned()
        })
    );
}

#[tokio::test]
async fn test_put_json_body() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(PUT)
            .path("/x")
            .header("content-type", "application/json")
            .json_body(json!({"a": 1}));
        then.status(200).json_body(json!({"a": 1}));
    });

    let out: Slot<serde_json::Value> = Slot::default();
    builder(&server)
        .put()
        .path("/x")
        .body_json(json!({"a": 1}))
        .check_status([200])
        .to_json(&out)
        .fetch()
        .await
        .unwrap();

    m.assert();
    assert_eq!(out.get(), json!({"a": 1}));
}

#[tokio::test]
async fn test_post_form_body() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(POST)
            .path("/submit")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("key1=value1&key2=value+2");
        then.status(201);
    });

    builder(&server)
        .post()
        .path("/submit")
        .body_form([("key2", "value 2"), ("key1", "value1")])
        .check_status([201])
        .fetch()
        .await
        .unwrap();

    m.assert();
}

#[tokio::test]
async fn test_status_mismatch_keeps_destination() {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404).json_body(json!({"a": 1}));
    });

    let out = Slot::new(json!("untouched"));
    let err = builder(&server)
        .path("/missing")
        .check_status([200])
        .to_json(&out)
        .fetch()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Validation);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    assert_eq!(out.get(), json!("untouched"));
}

#[tokio::test]
async fn test_to_headers_sends_head() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(httpmock::Method::HEAD).path("/resource");
        then.status(200).header("x-version", "3");
    });

    let headers = Slot::default();
    builder(&server)
        .path("/resource")
        .to_headers(&headers)
        .fetch()
        .await
        .unwrap();

    m.assert();
    assert_eq!(headers.get()["x-version"], "3");
}

#[tokio::test]
async fn test_writer_body_is_streamed() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(POST).path("/stream").body("chunk-1;chunk-2;");
        then.status(200).body("ok");
    });

    let text = Slot::default();
    builder(&server)
        .post()
        .path("/stream")
        .body_writer(|mut w| async move {
            for i in 1..=2 {
                w.write(format!("chunk-{i};")).await?;
            }
            Ok(())
        })
        .to_text(&text)
        .fetch()
        .await
        .unwrap();

    m.assert();
    assert_eq!(text.get(), "ok");
}

#[tokio::test]
async fn test_file_upload_and_download() {
    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(PUT)
            .path("/files/report.txt")
            .header("content-length", "11")
            .body("report body");
        then.status(204);
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/files/report.txt");
        then.status(200).body("report body");
    });

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(b"report body").unwrap();
    builder(&server)
        .put()
        .path("/files/report.txt")
        .body_file(source.path())
        .fetch()
        .await
        .unwrap();
    upload.assert();

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("downloads/report.txt");
    builder(&server)
        .path("/files/report.txt")
        .to_file(&target)
        .fetch()
        .await
        .unwrap();
    download.assert();
    assert_eq!(std::fs::read(&target).unwrap(), b"report body");
}

#[tokio::test]
async fn test_custom_user_agent_kept() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET).path("/ua").header("user-agent", "custom/1.0");
        then.status(200).body("abc");
    });

    let buf = Slot::new(BytesMut::new());
    builder(&server)
        .path("/ua")
        .user_agent("custom/1.0")
        .to_bytes_buffer(&buf)
        .fetch()
        .await
        .unwrap();

    m.assert();
    assert_eq!(&buf.get()[..], b"abc");
}

#[tokio::test]
async fn test_peek_rejects_html_error_page() {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/api");
        then.status(200).body("<html>maintenance</html>");
    });

    let err = builder(&server)
        .path("/api")
        .check_peek(1, |prefix| {
            if prefix == b"<" {
                return Err("got an HTML page".into());
            }
            Ok(())
        })
        .fetch()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("HTML page"));
}

#[tokio::test]
async fn test_tls_only_transport_refuses_plain_http() {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/plain");
        then.status(200);
    });

    let strict = HyperTransport::new().unwrap();
    let err = RequestBuilder::new()
        .base_url(server.base_url())
        .path("/plain")
        .transport(strict)
        .fetch()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Transport);
}
