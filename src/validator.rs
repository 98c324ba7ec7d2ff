use std::collections::HashSet;
use std::time::Duration;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::StatusCode;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::case::HttpMethod;
use crate::case::TestCase;
use crate::config::RunConfig;
use crate::parser;
use crate::parser::Stafett;
use crate::scenario::Group;
use crate::scenario::Scenario;
use crate::template;
use crate::template::BUILTINS;
use crate::template::VARS_ROOT;

pub struct Validator {
    stafett: Stafett,
    toml_src: String,
    file_name: String,
}

/// Run settings found in the scenario file. CLI flags may still override them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvSetup {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

impl ValidationError {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $snippet:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: find_span($snippet, &$self.toml_src),
        }
    };
    ($field:expr, $msg:expr, $self:expr, $snippet:expr, after = $anchor:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: find_span_after($anchor, $snippet, &$self.toml_src),
        }
    };
}

/// Where a template is allowed to look.
struct Scope<'a> {
    vars: &'a Map<String, Value>,
    steps: &'a HashSet<String>,
}

impl Validator {
    pub fn new(stafett: &Stafett, toml_src: &str, file_name: &str) -> Self {
        Self {
            stafett: stafett.clone(),
            toml_src: toml_src.into(),
            file_name: file_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(Scenario, EnvSetup), ValidationError> {
        let setup = self.validate_setup()?;
        let vars = self.validate_vars()?;
        let groups = self.validate_tests(&vars)?;

        Ok((Scenario { vars, groups }, setup))
    }

    fn validate_setup(&self) -> Result<EnvSetup, ValidationError> {
        let setup = &self.stafett.setup;

        if let Some(base_url) = &setup.base_url
            && let Err(e) = RunConfig::new(base_url)
        {
            return Err(validation_err!("setup.base_url", e, self, base_url));
        }

        let timeout = match setup.timeout_secs {
            Some(0) => {
                return Err(validation_err!(
                    "setup.timeout_secs",
                    "timeout must be greater than zero",
                    self,
                    "timeout_secs",
                    after = "[setup]"
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(EnvSetup {
            base_url: setup.base_url.clone(),
            timeout,
        })
    }

    /// Variables are evaluated before any step, in declaration order, so they
    /// may use built-ins and the variables declared above them.
    fn validate_vars(&self) -> Result<Map<String, Value>, ValidationError> {
        let no_steps = HashSet::new();

        let mut vars = Map::new();
        for (name, value) in &self.stafett.vars {
            let scope = Scope {
                vars: &vars,
                steps: &no_steps,
            };
            for text in template::string_leaves(value) {
                self.check_templates(&format!("vars.{name}"), text, &scope)?;
            }
            vars.insert(name.clone(), value.clone());
        }

        Ok(vars)
    }

    fn validate_tests(&self, vars: &Map<String, Value>) -> Result<Vec<Group>, ValidationError> {
        let global_headers = match &self.stafett.global.headers {
            Some(value) => self.parse_headers("global.headers", value)?,
            None => Vec::new(),
        };

        let mut known_ids = HashSet::new();
        let mut groups = Vec::with_capacity(self.stafett.test_groups.len());

        for group in &self.stafett.test_groups {
            let mut cases = Vec::with_capacity(group.tests.len());
            for test in &group.tests {
                cases.push(self.create_test(test, &global_headers, vars, &mut known_ids)?);
            }
            groups.push(Group {
                name: group.name.clone(),
                cases,
            });
        }

        Ok(groups)
    }

    fn create_test(
        &self,
        test: &parser::Test,
        global_headers: &[(HeaderName, String)],
        vars: &Map<String, Value>,
        known_ids: &mut HashSet<String>,
    ) -> Result<TestCase, ValidationError> {
        let method = test.method.parse::<HttpMethod>().map_err(|e| {
            validation_err!(
                format!("{} - method", test.name),
                e,
                self,
                &test.method,
                after = &quoted(&test.name)
            )
        })?;

        let expected_status = u16::try_from(test.assert_status)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| {
                validation_err!(
                    format!("{} - assert_status", test.name),
                    format!("`{}` is not a valid HTTP status code", test.assert_status),
                    self,
                    "assert_status",
                    after = &quoted(&test.name)
                )
            })?;

        // Start with the global headers, then merge the headers from the
        // individual test. A test header replaces a global one of the same name.
        let mut headers = global_headers.to_vec();
        if let Some(value) = &test.headers {
            for (name, value) in self.parse_headers(&format!("{} - headers", test.name), value)? {
                match headers.iter_mut().find(|(existing, _)| *existing == name) {
                    Some(slot) => slot.1 = value,
                    None => headers.push((name, value)),
                }
            }
        }

        let query = match &test.query {
            Some(value) => self.parse_query(&format!("{} - query", test.name), value)?,
            None => Vec::new(),
        };

        let mut case = TestCase::new(test.name.clone(), method, test.url.clone(), expected_status);
        case.payload = test.body.clone();
        case.query = query;
        case.headers = headers;

        let scope = Scope {
            vars,
            steps: &*known_ids,
        };
        for text in case.templates() {
            self.check_templates(&test.name, text, &scope)?;
        }

        if let Some(id) = &test.id {
            self.check_id(&test.name, id, known_ids)?;
            known_ids.insert(id.clone());
            case.id = Some(id.clone());
        }

        Ok(case)
    }

    fn check_id(&self, test_name: &str, id: &str, known_ids: &HashSet<String>) -> Result<(), ValidationError> {
        let field = format!("{test_name} - id");

        if id.is_empty()
            || id == VARS_ROOT
            || id.starts_with('$')
            || id.contains(['.', '{', '}'])
            || id.chars().any(char::is_whitespace)
        {
            return Err(validation_err!(
                field,
                format!("`{id}` cannot be used as a step id"),
                self,
                id
            ));
        }

        if known_ids.contains(id) {
            return Err(validation_err!(
                field,
                format!("duplicate step id `{id}`"),
                self,
                id
            ));
        }

        Ok(())
    }

    /// Every reference must point at a built-in, a declared variable or the
    /// id of a step declared before this one.
    fn check_templates(&self, field: &str, text: &str, scope: &Scope<'_>) -> Result<(), ValidationError> {
        let references = template::parse(text).map_err(|e| validation_err!(field, e, self, text))?;

        for reference in references {
            let problem = if reference.is_builtin() {
                if !BUILTINS.contains(&reference.root.as_str()) {
                    Some(format!(
                        "unknown built-in `{}`, expected one of {}",
                        reference.root,
                        BUILTINS.join(", ")
                    ))
                } else if !reference.path.is_empty() {
                    Some(format!("built-in `{}` has no fields", reference.root))
                } else {
                    None
                }
            } else if reference.is_var() {
                match reference.path.first() {
                    None => Some("`vars` needs a variable name, like `vars.email`".to_string()),
                    Some(name) if scope.vars.contains_key(name) => None,
                    Some(name) if self.stafett.vars.contains_key(name) => Some(format!(
                        "variable `{name}` must be declared before it is used"
                    )),
                    Some(name) => Some(format!("variable `{name}` is not declared in [vars]")),
                }
            } else if !scope.steps.contains(&reference.root) {
                Some(format!(
                    "`{}` is not the id of an earlier step",
                    reference.root
                ))
            } else {
                None
            };

            if let Some(message) = problem {
                return Err(validation_err!(field, message, self, text));
            }
        }

        Ok(())
    }

    fn parse_headers(
        &self,
        field: &str,
        value: &toml::Value,
    ) -> Result<Vec<(HeaderName, String)>, ValidationError> {
        let table = value.as_table().ok_or_else(|| {
            validation_err!(
                field,
                format!("Expected a table for headers, got {value:?}"),
                self,
                "headers"
            )
        })?;

        let mut headers = Vec::with_capacity(table.len());
        for (key, value) in table {
            let v_str = value.as_str().ok_or_else(|| {
                validation_err!(
                    field,
                    format!("Header value must be a string, got {value:?}"),
                    self,
                    key
                )
            })?;

            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                validation_err!(field, format!("Invalid header name `{key}`: {e}"), self, key)
            })?;

            // Templated values can only be checked once rendered.
            if !v_str.contains("{{")
                && let Err(e) = HeaderValue::from_str(v_str)
            {
                return Err(validation_err!(
                    field,
                    format!("Invalid header value for `{key}`: {e}"),
                    self,
                    v_str
                ));
            }

            headers.push((name, v_str.to_string()));
        }

        Ok(headers)
    }

    fn parse_query(
        &self,
        field: &str,
        value: &toml::Value,
    ) -> Result<Vec<(String, String)>, ValidationError> {
        let table = value.as_table().ok_or_else(|| {
            validation_err!(
                field,
                format!("Expected a table for query, got {value:?}"),
                self,
                "query"
            )
        })?;

        table
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => {
                        return Err(validation_err!(
                            field,
                            format!("Query value for `{key}` must be a scalar, got {other:?}"),
                            self,
                            key
                        ));
                    }
                };
                Ok((key.clone(), value))
            })
            .collect()
    }
}

fn quoted(text: &str) -> String {
    format!("\"{text}\"")
}

/// Like `find_span`, but only looks past the first occurrence of `anchor`,
/// so keys repeated across tests point at the offending one.
fn find_span_after(anchor: &str, needle: &str, toml_src: &str) -> Option<SourceSpan> {
    let start = toml_src.find(anchor).unwrap_or(0);
    find_span(needle, &toml_src[start..])
        .map(|span| SourceSpan::new((start + span.offset()).into(), span.len()))
}

fn find_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    toml_src
        .find(&quoted(needle))
        .map(|start| SourceSpan::new((start + 1).into(), needle.len()))
        .or_else(|| {
            toml_src
                .find(needle)
                .map(|start| SourceSpan::new(start.into(), needle.len()))
        })
}
