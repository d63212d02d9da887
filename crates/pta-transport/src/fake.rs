//! An in-memory `HttpTransport` fake for tests that need deterministic,
//! network-free responses (including injected failures for retry tests).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{HttpTransport, Response, Result};

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    responses: HashMap<String, Vec<Response>>,
    calls: HashMap<String, usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `path`. Multiple calls for the same path queue
    /// multiple responses, returned in order (useful for "fails once, then
    /// succeeds" retry tests).
    pub fn queue(&self, path: impl Into<String>, status: u16, body: impl Into<Bytes>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .responses
            .entry(path.into())
            .or_default()
            .push(Response {
                status,
                body: body.into(),
            });
    }

    pub fn call_count(&self, path: &str) -> usize {
        *self.inner.lock().unwrap().calls.get(path).unwrap_or(&0)
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, path: &str, _headers: &[(&str, &str)]) -> Result<Response> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(path.to_string()).or_insert(0) += 1;
        let queue = inner.responses.get_mut(path);
        match queue.and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
            Some(response) => Ok(response),
            None => Ok(Response {
                status: 404,
                body: Bytes::new(),
            }),
        }
    }
}
