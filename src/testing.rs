//! Test doubles shared by the unit tests.

use crate::client::{ClientError, HttpResponse, Transport, RETRY_AFTER_HEADER};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockReply {
    Response(HttpResponse),
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub authorization: Option<String>,
    pub form: Vec<(String, String)>,
}

struct Route {
    pattern: String,
    replies: VecDeque<MockReply>,
}

/// Scripted [`Transport`]: replies are matched by URL substring.
///
/// Each route plays its queued replies in order and repeats the last one.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, response: HttpResponse) {
        self.push(pattern, MockReply::Response(response));
    }

    pub fn fail(&self, pattern: &str, message: &str) {
        self.push(pattern, MockReply::Fail(message.to_string()));
    }

    /// Drop every reply queued for `pattern` and replace it with `response`.
    pub fn replace(&self, pattern: &str, response: HttpResponse) {
        self.routes.lock().retain(|r| r.pattern != pattern);
        self.respond(pattern, response);
    }

    fn push(&self, pattern: &str, reply: MockReply) {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|r| r.pattern == pattern) {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Make every request take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url.contains(pattern)).count()
    }

    pub fn rate_limited(retry_after: Option<&str>) -> HttpResponse {
        let mut response = HttpResponse::new(StatusCode::TOO_MANY_REQUESTS, "");
        if let Some(value) = retry_after {
            response
                .headers
                .insert(RETRY_AFTER_HEADER, HeaderValue::from_str(value).unwrap());
        }
        response
    }

    pub fn json(body: impl Into<String>) -> HttpResponse {
        HttpResponse::new(StatusCode::OK, body.into())
    }

    async fn reply(&self, request: RecordedRequest) -> Result<HttpResponse, ClientError> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut routes = self.routes.lock();
            routes.iter_mut().find(|r| url.contains(&r.pattern)).and_then(|route| {
                if route.replies.len() > 1 {
                    route.replies.pop_front()
                } else {
                    route.replies.front().cloned()
                }
            })
        };

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Fail(message)) => Err(ClientError::Connection(message)),
            None => Err(ClientError::Connection(format!("no route for {}", url))),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, authorization: Option<String>) -> Result<HttpResponse, ClientError> {
        self.reply(RecordedRequest {
            url: url.to_string(),
            authorization,
            form: Vec::new(),
        })
        .await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, ClientError> {
        self.reply(RecordedRequest {
            url: url.to_string(),
            authorization: None,
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .await
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    today: Mutex<String>,
}

impl ManualClock {
    pub fn new(today: &str) -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
            today: Mutex::new(today.to_string()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn set_today(&self, today: &str) {
        *self.today.lock() = today.to_string();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn today(&self) -> String {
        self.today.lock().clone()
    }
}

/// A `/states/all` row at `lat`/`lon` in the upstream positional layout.
pub fn state_row(icao24: &str, callsign: &str, lat: f64, lon: f64) -> String {
    format!(
        r#"["{}", "{}", "Spain", 1700000000, 1700000000, {}, {}, 1200.0, false, 95.0, 180.0, 0.0, null, 1250.0, "1000", false, 0]"#,
        icao24, callsign, lon, lat
    )
}

pub fn states_body(rows: &[String]) -> String {
    format!(r#"{{"time": 1700000000, "states": [{}]}}"#, rows.join(","))
}
