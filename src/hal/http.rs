// src/hal/http.rs
//! HTTP client abstraction for cloud communication
//!
//! The transport itself lives outside this crate; subsystems talk to the
//! cloud through the `HttpClient` trait. `MockHttpClient` is the scripted
//! in-memory implementation used by the integration tests.

use crate::error::GatewayResult;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Response to an HTTP request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cloud HTTP transport contract
///
/// Implementations install default headers (the `Authorization` API key)
/// once at construction; headers are read-only afterwards.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> GatewayResult<HttpResponse>;

    async fn post(&self, url: &str, body: &[u8], content_type: &str)
        -> GatewayResult<HttpResponse>;
}

/// A request captured by [`MockHttpClient`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: String,
}

struct Route {
    method: &'static str,
    pattern: String,
    responses: VecDeque<HttpResponse>,
}

/// Scripted HTTP client for tests and host-side development.
///
/// Responses are registered per URL substring; each registered response is
/// consumed once, and the last one for a route keeps repeating. Unmatched
/// requests answer 404.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    default_headers: Mutex<Vec<(String, String)>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default_headers(&self, headers: Vec<(String, String)>) {
        *self.default_headers.lock().unwrap() = headers;
    }

    pub fn default_headers(&self) -> Vec<(String, String)> {
        self.default_headers.lock().unwrap().clone()
    }

    pub fn on_get(&self, pattern: &str, status: u16, body: &str) {
        self.register("GET", pattern, HttpResponse::new(status, body));
    }

    pub fn on_post(&self, pattern: &str, status: u16, body: &str) {
        self.register("POST", pattern, HttpResponse::new(status, body));
    }

    fn register(&self, method: &'static str, pattern: &str, response: HttpResponse) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.pattern == pattern)
        {
            route.responses.push_back(response);
        } else {
            routes.push(Route {
                method,
                pattern: pattern.to_string(),
                responses: VecDeque::from([response]),
            });
        }
    }

    fn respond(&self, method: &'static str, url: &str, body: &str) -> HttpResponse {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.to_string(),
        });

        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|r| r.method == method && url.contains(r.pattern.as_str()))
            .max_by_key(|r| r.pattern.len());

        match route {
            Some(route) => {
                if route.responses.len() > 1 {
                    route.responses.pop_front().unwrap()
                } else {
                    route.responses.front().cloned().unwrap()
                }
            }
            None => HttpResponse::new(404, ""),
        }
    }

    /// All captured requests in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Captured requests whose URL contains `pattern`
    pub fn requests_to(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(pattern))
            .collect()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str) -> GatewayResult<HttpResponse> {
        Ok(self.respond("GET", url, ""))
    }

    async fn post(
        &self,
        url: &str,
        body: &[u8],
        _content_type: &str,
    ) -> GatewayResult<HttpResponse> {
        let body = String::from_utf8_lossy(body).into_owned();
        Ok(self.respond("POST", url, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(199, "").is_success());
        assert!(!HttpResponse::new(300, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[tokio::test]
    async fn test_scripted_responses_consume_in_order() {
        let client = MockHttpClient::new();
        client.on_get("/status", 200, "first");
        client.on_get("/status", 200, "second");

        assert_eq!(client.get("http://c/status").await.unwrap().body, "first");
        assert_eq!(client.get("http://c/status").await.unwrap().body, "second");
        // Last response repeats
        assert_eq!(client.get("http://c/status").await.unwrap().body, "second");
    }

    #[tokio::test]
    async fn test_unmatched_is_not_found() {
        let client = MockHttpClient::new();
        let resp = client.get("http://c/missing").await.unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_longest_pattern_wins() {
        let client = MockHttpClient::new();
        client.on_get("/api", 200, "generic");
        client.on_get("/api/inverter/read", 200, "specific");

        let resp = client.get("http://c/api/inverter/read?address=0").await.unwrap();
        assert_eq!(resp.body, "specific");
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let client = MockHttpClient::new();
        client.on_post("/upload", 200, "");

        client.post("http://c/upload", b"payload", "application/json").await.unwrap();

        let requests = client.requests_to("/upload");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, "payload");
    }
}
