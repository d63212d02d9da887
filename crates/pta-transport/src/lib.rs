//! The Puppet Server v3 tasks API, consumed through an opaque HTTP
//! transport capability.
//!
//! The real certificate handling, hostname discovery, and connection
//! pooling live in the surrounding agent's HTTPS client; this crate only
//! models the shape of that collaborator (`HttpTransport`) plus the task
//! API endpoints layered on top of it, so the rest of the workspace can be
//! tested against an in-memory fake instead of a live server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod fake;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("error making HTTP request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("error parsing URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("server returned non-200 status {status} for {path}")]
    NonSuccessStatus { status: u16, path: String },
    #[error("failed to parse JSON response: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A minimal HTTP response: just enough for the tasks API and file
/// downloads to work with.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// The opaque HTTPS client capability this subsystem consumes.
///
/// `path` is a full URL (scheme, host, path, and query already composed
/// by the caller); the transport's job is purely to execute the GET.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Result<Response>;
}

/// Production transport, backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Result<Response> {
        let mut request = self.client.get(path);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(Response { status, body })
    }
}

/// A task's source location: a server path plus query parameters that are
/// kept separate from the path until a request is actually issued.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileUri {
    pub path: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl FileUri {
    /// Compose the final request URL, merging `params` into `path`.
    ///
    /// The source agent concatenates `path + "?" + urlencode(params)`
    /// unconditionally, which corrupts any `path` that already carries a
    /// query string. This merges instead: append with `?` if `path` has
    /// no query yet, otherwise append with `&`; never append a bare
    /// separator when `params` is empty.
    pub fn resolve(&self) -> String {
        if self.params.is_empty() {
            return self.path.clone();
        }
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();
        let separator = if self.path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.path, separator, encoded)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskListEntry {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Client for the `/puppet/v3/tasks` family of endpoints.
pub struct TaskServerClient<T: HttpTransport> {
    transport: T,
    base_url: String,
}

impl<T: HttpTransport> TaskServerClient<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    /// Split a qualified task name on `::`. A single segment implies the
    /// `init` task of that module. More than one separator joins every
    /// segment after the first back together with `::`, so the task half
    /// of the split always reconstitutes the remainder of the name
    /// byte-for-byte (see `ParseName` in the spec for the rationale).
    pub fn parse_name(qname: &str) -> (String, String) {
        match qname.split_once("::") {
            None => (qname.to_string(), "init".to_string()),
            Some((module, rest)) => (module.to_string(), rest.to_string()),
        }
    }

    pub async fn metadata(&self, qname: &str, environment: &str) -> Result<serde_json::Value> {
        let (module, task) = Self::parse_name(qname);
        let url = format!(
            "{}/puppet/v3/tasks/{module}/{task}?environment={environment}",
            self.base_url
        );
        debug!(%url, "fetching task metadata");
        let response = self.transport.get(&url, &[]).await?;
        if !response.is_success() {
            return Err(TransportError::NonSuccessStatus {
                status: response.status,
                path: url,
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn list(&self, environment: &str) -> Result<Vec<TaskListEntry>> {
        let url = format!("{}/puppet/v3/tasks?environment={environment}", self.base_url);
        let response = self.transport.get(&url, &[]).await?;
        if !response.is_success() {
            return Err(TransportError::NonSuccessStatus {
                status: response.status,
                path: url,
            });
        }
        let mut entries: Vec<TaskListEntry> = serde_json::from_slice(&response.body)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Fetch a file's bytes, issuing `Accept: application/octet-stream`.
    pub async fn fetch_file(&self, uri: &FileUri) -> Result<Bytes> {
        let url = uri.resolve();
        let response = self
            .transport
            .get(&url, &[("Accept", "application/octet-stream")])
            .await?;
        if !response.is_success() {
            return Err(TransportError::NonSuccessStatus {
                status: response.status,
                path: url,
            });
        }
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("a", ("a", "init"); "single segment implies init")]
    #[test_case("a::b", ("a", "b"); "two segments")]
    #[test_case("a::b::c", ("a", "b::c"); "extra segments preserved in task half")]
    fn parses_qualified_names(input: &str, expected: (&str, &str)) {
        let (module, task) = TaskServerClient::<ReqwestTransport>::parse_name(input);
        assert_eq!((module.as_str(), task.as_str()), expected);
    }

    #[test]
    fn resolves_uri_without_params() {
        let uri = FileUri {
            path: "https://server/files/a".to_string(),
            params: BTreeMap::new(),
        };
        assert_eq!(uri.resolve(), "https://server/files/a");
    }

    #[test]
    fn resolves_uri_with_params_using_question_mark() {
        let mut params = BTreeMap::new();
        params.insert("environment".to_string(), "production".to_string());
        let uri = FileUri {
            path: "https://server/files/a".to_string(),
            params,
        };
        assert_eq!(
            uri.resolve(),
            "https://server/files/a?environment=production"
        );
    }

    #[test]
    fn resolves_uri_with_existing_query_using_ampersand() {
        let mut params = BTreeMap::new();
        params.insert("environment".to_string(), "production".to_string());
        let uri = FileUri {
            path: "https://server/files/a?foo=bar".to_string(),
            params,
        };
        assert_eq!(
            uri.resolve(),
            "https://server/files/a?foo=bar&environment=production"
        );
    }

    #[test]
    fn round_trips_every_param_through_the_composed_url() {
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), "1 2".to_string());
        params.insert("b".to_string(), "x/y".to_string());
        let uri = FileUri {
            path: "https://server/files/a".to_string(),
            params: params.clone(),
        };
        let resolved = uri.resolve();
        let query = resolved.split_once('?').unwrap().1;
        let parsed: BTreeMap<String, String> =
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        assert_eq!(parsed, params);
    }
}
