//! `HttpClient` against a local scripted HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchalerts::{AlertError, HttpClient, JsonApi, RetryPolicy};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serves canned `(status, body)` responses in order, repeating the last one.
struct ScriptedServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (counter, seen) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            let mut current = None;
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                counter.fetch_add(1, Ordering::SeqCst);

                if let Some(next) = responses.next() {
                    current = Some(next);
                }
                let (status, body) = current.unwrap_or((500, "no scripted response"));
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        ScriptedServer {
            base_url: format!("http://{addr}/api"),
            hits,
            requests,
        }
    }

    fn client(&self, max_retries: u32) -> HttpClient {
        HttpClient::new(&self.base_url, HeaderMap::new())
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(1),
            })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Read one request: headers, then `Content-Length` bytes of body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                return text;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).to_string(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

#[tokio::test]
async fn transient_statuses_are_retried_until_success() {
    let server =
        ScriptedServer::start(vec![(503, "busy"), (429, "slow down"), (200, r#"{"ok":1}"#)]).await;

    let value = server
        .client(5)
        .get("/runs/", &[("sha", "abc".to_string())])
        .await
        .unwrap();

    assert_eq!(value, json!({"ok": 1}));
    assert_eq!(server.hits(), 3);
    assert!(server
        .requests()
        .iter()
        .all(|r| r.starts_with("GET /api/runs/?sha=abc HTTP/1.1")));
}

#[tokio::test]
async fn retries_stop_at_the_limit_with_last_status_and_body() {
    let server = ScriptedServer::start(vec![(502, "gw")]).await;

    let err = server.client(2).get("/runs/x/", &[]).await.unwrap_err();

    assert_eq!(err.status(), Some(502));
    match err {
        AlertError::Http {
            status,
            method,
            url,
            body,
        } => {
            assert_eq!(status, 502);
            assert_eq!(method, "GET");
            assert!(url.ends_with("/api/runs/x/"));
            assert_eq!(body, "gw");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn non_transient_status_fails_immediately() {
    let server = ScriptedServer::start(vec![(404, r#"{"description":"nope"}"#)]).await;

    let err = server.client(5).get("/runs/missing/", &[]).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(err.to_string().contains(r#"{"description":"nope"}"#));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn empty_success_body_is_none() {
    let server = ScriptedServer::start(vec![(201, "")]).await;

    let res = server.client(0).post("/login/", None).await.unwrap();

    assert_eq!(res, None);
    assert_eq!(server.hits(), 1);
    let request = &server.requests()[0];
    assert!(request.starts_with("POST /api/login/ HTTP/1.1"));
    assert!(request.ends_with("{}"));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = ScriptedServer::start(vec![(200, r#"{"id":7}"#)]).await;

    let res = server
        .client(0)
        .post("/statuses/abc", Some(&json!({"state": "pending"})))
        .await
        .unwrap();

    assert_eq!(res, Some(json!({"id": 7})));
    let request = &server.requests()[0];
    assert!(request
        .to_ascii_lowercase()
        .contains("content-type: application/json"));
    assert!(request.ends_with(r#"{"state":"pending"}"#));
}
