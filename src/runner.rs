use std::error::Error as _;

use flume::Sender;
use reqwest::Client;
use reqwest::Response;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::case::Body;
use crate::case::CaseError;
use crate::case::CaseResult;
use crate::case::TestCase;
use crate::config::RunConfig;
use crate::history::History;
use crate::scenario::Scenario;
use crate::template;
use crate::template::ExtractionError;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("failed to evaluate scenario variables: {0}")]
    Vars(#[from] ExtractionError),
}

/// What the runner tells the reporting sink, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Group { name: String, cases: usize },
    Case(CaseResult),
    Aborted { case: String },
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub results: Vec<CaseResult>,
    /// Name of the case the run stopped at, when fail-fast aborted it.
    pub aborted_at: Option<String>,
}

impl ScenarioReport {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|result| !result.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.aborted_at.is_none() && self.failed() == 0
    }
}

struct PreparedRequest {
    url: Url,
    payload: Option<Value>,
    headers: HeaderMap,
}

pub struct Runner {
    client: Client,
    config: RunConfig,
    events: Sender<Event>,
}

impl Runner {
    pub fn new(config: RunConfig, events: Sender<Event>) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(RunnerError::Client)?;

        Ok(Self {
            client,
            config,
            events,
        })
    }

    /// Executes one test case against the target and reports the result.
    ///
    /// At most one HTTP call is made. Nothing is sent when a step this case
    /// depends on is unusable, or when a reference cannot be extracted; both
    /// are turned into a failed result. Transport errors never propagate.
    pub async fn execute(&self, case: &TestCase, history: &History) -> CaseResult {
        let result = self.perform(case, history).await;
        self.report(Event::Case(result.clone())).await;
        result
    }

    /// Runs every case of `scenario` in declaration order.
    ///
    /// A case whose dependency failed is skipped and reported as failed, and
    /// the run carries on with the remaining cases. With fail-fast configured
    /// the first broken chain stops the run instead.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, RunnerError> {
        let mut history = History::new(scenario.evaluate_vars()?);

        for group in &scenario.groups {
            self.report(Event::Group {
                name: group.name.clone(),
                cases: group.cases.len(),
            })
            .await;

            for case in &group.cases {
                let result = self.execute(case, &history).await;
                let chain_broken = result.breaks_chain();
                history.push(result);

                if chain_broken && self.config.fail_fast() {
                    warn!(case = %case.name, "chain broken, aborting scenario");
                    self.report(Event::Aborted {
                        case: case.name.clone(),
                    })
                    .await;

                    return Ok(ScenarioReport {
                        results: history.into_results(),
                        aborted_at: Some(case.name.clone()),
                    });
                }
            }
        }

        Ok(ScenarioReport {
            results: history.into_results(),
            aborted_at: None,
        })
    }

    async fn perform(&self, case: &TestCase, history: &History) -> CaseResult {
        let dependencies = case.dependencies();
        if let Some(blocked_by) = history.first_unusable(&dependencies) {
            warn!(case = %case.name, blocked_by, "skipping dependent case");
            return CaseResult::errored(
                case,
                None,
                CaseError::Skipped {
                    blocked_by: blocked_by.to_string(),
                },
            );
        }

        let request = match self.prepare(case, history) {
            Ok(request) => request,
            Err(error) => {
                warn!(case = %case.name, %error, "could not prepare request");
                return CaseResult::errored(case, None, error);
            }
        };

        debug!(case = %case.name, method = %case.method, url = %request.url, "sending request");

        let mut builder = self
            .client
            .request(case.method.into(), request.url.clone())
            .headers(request.headers);
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                let (body, error) = capture_body(response).await;
                debug!(case = %case.name, %status, "received response");
                CaseResult::completed(case, request.url, status, body, error)
            }
            Err(error) => {
                let error = self.transport_error(error);
                debug!(case = %case.name, %error, "request failed");
                CaseResult::errored(case, Some(request.url), error)
            }
        }
    }

    /// Renders every template of `case` against `history`.
    fn prepare(&self, case: &TestCase, history: &History) -> Result<PreparedRequest, CaseError> {
        let endpoint = template::render_str(&case.endpoint, history)?;
        let mut url = self
            .config
            .resolve(&endpoint)
            .map_err(|e| CaseError::InvalidRequest(format!("endpoint `{endpoint}`: {e}")))?;

        if !case.query.is_empty() {
            let query = case
                .query
                .iter()
                .map(|(key, value)| Ok((key.as_str(), template::render_str(value, history)?)))
                .collect::<Result<Vec<_>, ExtractionError>>()?;
            url.query_pairs_mut().extend_pairs(query);
        }

        let payload = case
            .payload
            .as_ref()
            .map(|payload| template::render_value(payload, history))
            .transpose()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &case.headers {
            let value = template::render_str(value, history)?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| CaseError::InvalidRequest(format!("header `{name}`: {e}")))?;
            headers.insert(name.clone(), value);
        }

        Ok(PreparedRequest {
            url,
            payload,
            headers,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> CaseError {
        if error.is_timeout() {
            return CaseError::Timeout {
                timeout: self.config.timeout(),
            };
        }

        let message = error_chain(&error);
        if error.is_connect() {
            CaseError::Connect(message)
        } else {
            CaseError::Transport(message)
        }
    }

    async fn report(&self, event: Event) {
        if self.events.send_async(event).await.is_err() {
            debug!("reporting sink closed, event dropped");
        }
    }
}

/// Decodes JSON when the response declares it, keeps raw text otherwise.
async fn capture_body(response: Response) -> (Body, Option<CaseError>) {
    let declares_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.contains("application/json"));

    // Consume the body exactly once
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => {
            return (
                Body::empty(),
                Some(CaseError::Transport(format!("failed to read body: {err}"))),
            );
        }
    };

    if !declares_json {
        return (Body::Text(text), None);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => (Body::Json(json), None),
        Err(err) => (Body::Text(text), Some(CaseError::Decode(err.to_string()))),
    }
}

/// reqwest's top-level message rarely names the cause, so append the sources.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod test {
    use reqwest::StatusCode;
    use reqwest::header::HeaderName;
    use serde_json::json;

    use crate::case::CaseError;
    use crate::case::HttpMethod;
    use crate::case::TestCase;
    use crate::config::RunConfig;
    use crate::history::History;
    use crate::runner::Event;
    use crate::runner::Runner;
    use crate::scenario::Scenario;

    // Nothing listens on port 1, so every request is refused.
    const UNREACHABLE: &str = "http://127.0.0.1:1";

    fn runner(fail_fast: bool) -> (Runner, flume::Receiver<Event>) {
        let (tx, rx) = flume::unbounded();
        let config = RunConfig::new(UNREACHABLE).unwrap().with_fail_fast(fail_fast);
        (Runner::new(config, tx).unwrap(), rx)
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_failed_result() {
        let (runner, rx) = runner(false);
        let case = TestCase::new("sign-up", HttpMethod::Post, "/authentication/sign/up", StatusCode::OK)
            .with_payload(json!({ "Email": "a@b.com", "Password": "plsnohack" }));

        let result = runner.execute(&case, &History::default()).await;

        assert!(!result.passed);
        assert_eq!(result.status_code, None);
        assert!(!result.error.as_ref().unwrap().to_string().is_empty());
        assert_eq!(
            result.url.as_ref().map(|url| url.as_str()),
            Some("http://127.0.0.1:1/authentication/sign/up")
        );

        let Ok(Event::Case(reported)) = rx.try_recv() else {
            panic!("execute must report its result");
        };
        assert_eq!(reported, result);
    }

    #[tokio::test]
    async fn extraction_failure_sends_nothing() {
        let (runner, rx) = runner(false);
        let case = TestCase::new("get user", HttpMethod::Get, "get/user/by/id/{{ vars.missing }}", StatusCode::OK);

        let result = runner.execute(&case, &History::new(json!({}))).await;

        assert!(matches!(result.error, Some(CaseError::Extraction(_))));
        assert!(result.breaks_chain());
        assert_eq!(result.url, None);
        assert!(matches!(rx.try_recv(), Ok(Event::Case(_))));
    }

    #[tokio::test]
    async fn rendered_header_that_is_not_a_header_value_is_rejected() {
        let (runner, rx) = runner(false);
        let case = TestCase::new("update item", HttpMethod::Patch, "update/item", StatusCode::OK)
            .with_header(HeaderName::from_static("x-note"), "{{ vars.note }}");
        let history = History::new(json!({ "note": "line\nbreak" }));

        let result = runner.execute(&case, &history).await;

        assert!(!result.passed);
        assert_eq!(result.status_code, None);
        assert_eq!(result.url, None);
        assert!(matches!(
            &result.error,
            Some(CaseError::InvalidRequest(message)) if message.contains("x-note")
        ));
        assert!(!result.is_usable());
        assert!(!result.breaks_chain());
        assert!(matches!(rx.try_recv(), Ok(Event::Case(_))));
    }

    #[tokio::test]
    async fn dependents_are_skipped_transitively() {
        let (runner, rx) = runner(false);
        let scenario = Scenario::new().with_group(
            "Users",
            vec![
                TestCase::new("get user", HttpMethod::Get, "get/user", StatusCode::OK).with_id("user"),
                TestCase::new("get items", HttpMethod::Get, "items/{{ user.data.id }}", StatusCode::OK)
                    .with_id("items"),
                TestCase::new("get item", HttpMethod::Get, "item/{{ items.data.0.id }}", StatusCode::OK),
                TestCase::new("health", HttpMethod::Get, "health", StatusCode::OK),
            ],
        );

        let report = runner.run(&scenario).await.unwrap();

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.aborted_at, None);
        assert!(matches!(report.results[0].error, Some(CaseError::Connect(_))));
        assert_eq!(
            report.results[1].error,
            Some(CaseError::Skipped { blocked_by: "user".into() })
        );
        assert_eq!(
            report.results[2].error,
            Some(CaseError::Skipped { blocked_by: "items".into() })
        );
        // Independent steps still run.
        assert!(matches!(report.results[3].error, Some(CaseError::Connect(_))));
        assert_eq!(report.failed(), 4);

        let events: Vec<Event> = rx.drain().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            Event::Group {
                name: "Users".into(),
                cases: 4
            }
        );
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_broken_chain() {
        let (runner, rx) = runner(true);
        let scenario = Scenario::new()
            .with_group(
                "Users",
                vec![
                    TestCase::new("get user", HttpMethod::Get, "get/user", StatusCode::OK).with_id("user"),
                    TestCase::new("health", HttpMethod::Get, "health", StatusCode::OK),
                    TestCase::new("get items", HttpMethod::Get, "items/{{ user.id }}", StatusCode::OK),
                ],
            )
            .with_group(
                "Never",
                vec![TestCase::new("never", HttpMethod::Get, "never", StatusCode::OK)],
            );

        let report = runner.run(&scenario).await.unwrap();

        // A plain transport failure is not a chain break; the skip is.
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.aborted_at.as_deref(), Some("get items"));
        assert!(!report.all_passed());

        let events: Vec<Event> = rx.drain().collect();
        assert_eq!(
            events.last(),
            Some(&Event::Aborted {
                case: "get items".into()
            })
        );
        assert!(!events.iter().any(|event| matches!(event, Event::Group { name, .. } if name == "Never")));
    }

    #[tokio::test]
    async fn closed_sink_does_not_stop_execution() {
        let (runner, rx) = runner(false);
        drop(rx);
        let case = TestCase::new("x", HttpMethod::Delete, "x", StatusCode::NO_CONTENT);

        let result = runner.execute(&case, &History::default()).await;

        assert!(!result.passed);
    }
}
