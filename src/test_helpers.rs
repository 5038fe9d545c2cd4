//! Shared fakes for unit tests: an in-memory HTTP session and subject store.

use crate::error::{Error, Result};
use crate::http::{HttpHeaders, HttpResponse, HttpSession, RequestOptions};
use crate::store::SubjectStore;
use crate::types::{Subject, SubjectKey};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Request method seen by the fake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Get,
    Head,
}

/// Scripted reply for one request
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    /// Response with the body split into chunks; `then_fail` ends the stream
    /// with a connection reset after the last chunk
    Response {
        status: u16,
        headers: HttpHeaders,
        chunks: Vec<Vec<u8>>,
        then_fail: bool,
    },
    /// Transport timeout before any response
    Timeout,
}

impl Reply {
    pub(crate) fn status(status: u16) -> Self {
        Reply::Response {
            status,
            headers: vec![],
            chunks: vec![],
            then_fail: false,
        }
    }

    pub(crate) fn json(value: serde_json::Value) -> Self {
        Reply::Response {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            chunks: vec![value.to_string().into_bytes()],
            then_fail: false,
        }
    }

    /// Body with a matching `Content-Length`
    pub(crate) fn body(status: u16, data: &[u8]) -> Self {
        Reply::Response {
            status,
            headers: vec![("content-length".to_string(), data.len().to_string())],
            chunks: vec![data.to_vec()],
            then_fail: false,
        }
    }

    /// Announces `announced` bytes but delivers `data` and then drops the connection
    pub(crate) fn truncated(status: u16, data: &[u8], announced: u64) -> Self {
        Reply::Response {
            status,
            headers: vec![("content-length".to_string(), announced.to_string())],
            chunks: vec![data.to_vec()],
            then_fail: true,
        }
    }

    /// HEAD-style reply: headers only
    pub(crate) fn head(content_length: u64) -> Self {
        Reply::Response {
            status: 200,
            headers: vec![("content-length".to_string(), content_length.to_string())],
            chunks: vec![],
            then_fail: false,
        }
    }

    fn into_response(self) -> Result<HttpResponse> {
        match self {
            Reply::Timeout => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "request timed out",
            ))),
            Reply::Response {
                status,
                headers,
                chunks,
                then_fail,
            } => {
                let mut items: Vec<Result<Bytes>> =
                    chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
                if then_fail {
                    items.push(Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))));
                }
                Ok(HttpResponse::new(
                    status,
                    headers,
                    futures::stream::iter(items).boxed(),
                ))
            }
        }
    }
}

/// A request the fake received
#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) options: RequestOptions,
}

impl Recorded {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.options
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct FakeInner {
    routes: HashMap<(Method, String), VecDeque<Reply>>,
    requests: Vec<Recorded>,
}

/// In-memory session answering from per-URL reply queues
///
/// Replies are consumed in FIFO order; the last reply of a queue repeats.
/// Unrouted requests get a 404.
#[derive(Default)]
pub(crate) struct FakeSession {
    inner: Mutex<FakeInner>,
}

impl FakeSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, method: Method, url: impl Into<String>, reply: Reply) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .routes
            .entry((method, url.into()))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn push_get(&self, url: impl Into<String>, reply: Reply) {
        self.push(Method::Get, url, reply);
    }

    pub(crate) fn push_head(&self, url: impl Into<String>, reply: Reply) {
        self.push(Method::Head, url, reply);
    }

    /// Replace whatever is queued for a GET of `url`
    pub(crate) fn set_get(&self, url: impl Into<String>, reply: Reply) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .routes
            .insert((Method::Get, url.into()), VecDeque::from([reply]));
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Number of requests of any method made to `url`
    pub(crate) fn requests_to(&self, url: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    fn answer(&self, method: Method, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(Recorded {
            method,
            url: url.to_string(),
            options,
        });

        let reply = match inner.routes.get_mut(&(method, url.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        reply.unwrap_or_else(|| Reply::status(404)).into_response()
    }
}

#[async_trait]
impl HttpSession for FakeSession {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.answer(Method::Get, url, options)
    }

    async fn head(&self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.answer(Method::Head, url, options)
    }
}

/// Subject store kept in memory
#[derive(Default)]
pub(crate) struct MemorySubjectStore {
    subjects: Mutex<Vec<Subject>>,
}

impl MemorySubjectStore {
    pub(crate) fn with(subjects: Vec<Subject>) -> Self {
        Self {
            subjects: Mutex::new(subjects),
        }
    }
}

#[async_trait]
impl SubjectStore for MemorySubjectStore {
    async fn list(&self) -> Result<Vec<Subject>> {
        Ok(self.subjects.lock().unwrap().clone())
    }

    async fn get(&self, key: &SubjectKey) -> Result<Option<Subject>> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.key == key)
            .cloned())
    }

    async fn update_watermark(&self, key: &SubjectKey, watermark: NaiveDateTime) -> Result<()> {
        let mut subjects = self.subjects.lock().unwrap();
        let subject = subjects
            .iter_mut()
            .find(|s| &s.key == key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        subject.watermark = Some(watermark);
        Ok(())
    }

    async fn upsert(&self, subject: Subject) -> Result<()> {
        let mut subjects = self.subjects.lock().unwrap();
        match subjects.iter_mut().find(|s| s.key == subject.key) {
            Some(existing) => *existing = subject,
            None => subjects.push(subject),
        }
        Ok(())
    }

    async fn remove(&self, key: &SubjectKey) -> Result<bool> {
        let mut subjects = self.subjects.lock().unwrap();
        let before = subjects.len();
        subjects.retain(|s| &s.key != key);
        Ok(subjects.len() != before)
    }
}
