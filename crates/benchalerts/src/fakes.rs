//! In-memory fake of [`JsonApi`] (testing only)
//!
//! `FakeApi` serves canned JSON per method and path and records every
//! request it receives, so client and workflow behavior can be checked
//! without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AlertError, Result};
use crate::http::JsonApi;

/// A request seen by a [`FakeApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
enum FakeResponse {
    Json(Value),
    Empty,
    Status { status: u16, body: String },
}

/// Route table keyed by `(method, path)`.
///
/// Each route holds a queue of responses; the last one is repeated once the
/// queue is down to a single entry.
#[derive(Debug, Default)]
pub struct FakeApi {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<FakeResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, method: &'static str, path: &str, response: FakeResponse) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub fn with_get(self, path: &str, body: Value) -> Self {
        self.push("GET", path, FakeResponse::Json(body))
    }

    pub fn with_post(self, path: &str, body: Value) -> Self {
        self.push("POST", path, FakeResponse::Json(body))
    }

    /// POST route answering with an empty body.
    pub fn with_empty_post(self, path: &str) -> Self {
        self.push("POST", path, FakeResponse::Empty)
    }

    pub fn with_get_error(self, path: &str, status: u16, body: &str) -> Self {
        self.push(
            "GET",
            path,
            FakeResponse::Status {
                status,
                body: body.to_string(),
            },
        )
    }

    pub fn with_post_error(self, path: &str, status: u16, body: &str) -> Self {
        self.push(
            "POST",
            path,
            FakeResponse::Status {
                status,
                body: body.to_string(),
            },
        )
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies of every POST sent to `path`, in order.
    pub fn posted_to(&self, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.path == path)
            .map(|r| r.body.unwrap_or(Value::Null))
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "POST")
            .count()
    }

    fn respond(
        &self,
        method: &'static str,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body: body.cloned(),
        });

        let mut routes = self.routes.lock().unwrap();
        let response = match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match response {
            Some(FakeResponse::Json(value)) => Ok(Some(value)),
            Some(FakeResponse::Empty) => Ok(None),
            Some(FakeResponse::Status { status, body }) => Err(AlertError::Http {
                status,
                method: method.to_string(),
                url: path.to_string(),
                body,
            }),
            None => Err(AlertError::Http {
                status: 404,
                method: method.to_string(),
                url: path.to_string(),
                body: "no fake route".to_string(),
            }),
        }
    }
}

#[async_trait]
impl JsonApi for FakeApi {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let value = self.respond("GET", path, params, None)?;
        Ok(value.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        self.respond("POST", path, &[], body)
    }
}
