use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderName;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::asserter::Verdict;
use crate::asserter::assert_status;
use crate::template;
use crate::template::ExtractionError;

/// The methods a test case may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid HTTP method `{0}`, expected one of GET, POST, PUT, PATCH or DELETE")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// An inert description of one HTTP call and the status it must return.
///
/// Nothing happens when a `TestCase` is built. It is executed by
/// [`Runner::execute`](crate::runner::Runner::execute), which renders the
/// `{{ ... }}` references in the endpoint, payload, query and header values
/// against the results of earlier steps.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: Option<String>,
    pub name: String,
    pub method: HttpMethod,
    pub endpoint: String,
    pub expected_status: StatusCode,
    pub payload: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(HeaderName, String)>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        method: HttpMethod,
        endpoint: impl Into<String>,
        expected_status: StatusCode,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            method,
            endpoint: endpoint.into(),
            expected_status,
            payload: None,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Makes the result of this case addressable as `{{ <id>.<path> }}`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Every piece of text that may carry a template.
    pub fn templates(&self) -> Vec<&str> {
        let mut texts = vec![self.endpoint.as_str()];
        if let Some(payload) = &self.payload {
            texts.extend(template::string_leaves(payload));
        }
        texts.extend(self.query.iter().map(|(_, value)| value.as_str()));
        texts.extend(self.headers.iter().map(|(_, value)| value.as_str()));
        texts
    }

    /// Ids of the earlier steps this case reads from, in first-use order.
    ///
    /// Malformed templates are ignored here; they surface as an extraction
    /// error when the case is executed.
    pub fn dependencies(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for text in self.templates() {
            let Ok(references) = template::parse(text) else {
                continue;
            };
            for reference in references {
                if reference.is_step() && !ids.contains(&reference.root) {
                    ids.push(reference.root);
                }
            }
        }
        ids
    }
}

/// Response body as captured from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    pub fn empty() -> Self {
        Body::Text(String::new())
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Text(_) => None,
        }
    }

    /// A short single-line rendition for console output.
    pub fn preview(&self, max_chars: usize) -> String {
        let text = match self {
            Body::Json(value) => value.to_string(),
            Body::Text(text) => text.replace('\n', " "),
        };
        if text.chars().count() > max_chars {
            let cut: String = text.chars().take(max_chars).collect();
            format!("{cut}…")
        } else {
            text
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaseError {
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("response declared JSON but could not be decoded: {0}")]
    Decode(String),

    #[error("could not build request: {0}")]
    InvalidRequest(String),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("skipped because `{blocked_by}` did not succeed")]
    Skipped { blocked_by: String },
}

/// The outcome of executing one [`TestCase`]. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub id: Option<String>,
    pub name: String,
    pub method: HttpMethod,
    pub url: Option<Url>,
    pub expected_status: StatusCode,
    pub passed: bool,
    pub status_code: Option<StatusCode>,
    pub body: Body,
    pub error: Option<CaseError>,
}

impl CaseResult {
    /// A response was received; `passed` is decided by the status alone.
    pub fn completed(
        case: &TestCase,
        url: Url,
        status: StatusCode,
        body: Body,
        error: Option<CaseError>,
    ) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            method: case.method,
            url: Some(url),
            expected_status: case.expected_status,
            passed: assert_status(case.expected_status, Some(status)) == Verdict::Pass,
            status_code: Some(status),
            body,
            error,
        }
    }

    /// No response was received.
    pub fn errored(case: &TestCase, url: Option<Url>, error: CaseError) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            method: case.method,
            url,
            expected_status: case.expected_status,
            passed: false,
            status_code: None,
            body: Body::empty(),
            error: Some(error),
        }
    }

    /// The `(name, passed, status code)` triple summaries are built from.
    pub fn summary(&self) -> (&str, bool, Option<u16>) {
        (
            self.name.as_str(),
            self.passed,
            self.status_code.map(|status| status.as_u16()),
        )
    }

    /// Only usable results may feed later steps.
    pub fn is_usable(&self) -> bool {
        self.passed && self.error.is_none()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.error, Some(CaseError::Skipped { .. }))
    }

    /// Whether this result is a broken link in the dependency chain rather
    /// than an ordinary failed assertion.
    pub fn breaks_chain(&self) -> bool {
        matches!(
            self.error,
            Some(CaseError::Skipped { .. } | CaseError::Extraction(_))
        )
    }
}
