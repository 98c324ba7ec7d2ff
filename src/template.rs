//! `{{ root.path.to.field }}` references between steps.
//!
//! A reference root is either the id of an earlier step, `vars` for the
//! scenario variables, or a built-in generator such as `$random_email`.
//! Path segments select object fields, numeric segments index arrays.

use std::fmt;
use std::ops::Range;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const VARS_ROOT: &str = "vars";
pub const BUILTINS: &[&str] = &["$uuid", "$random_email"];

const EMAIL_DOMAINS: &[&str] = &["gmail.com", "yahoo.com", "outlook.com", "example.com"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub path: Vec<String>,
    /// Byte range of the whole `{{ ... }}` in the source text.
    pub span: Range<usize>,
}

impl Reference {
    fn parse(expr: &str, span: Range<usize>) -> Result<Self, TemplateError> {
        if expr.is_empty() {
            return Err(TemplateError::Empty { offset: span.start });
        }

        let mut segments = expr.split('.').map(str::trim);
        let root = segments.next().unwrap_or_default().to_string();
        let path: Vec<String> = segments.map(str::to_string).collect();

        if root.is_empty() || path.iter().any(String::is_empty) {
            return Err(TemplateError::InvalidPath {
                expr: expr.to_string(),
            });
        }

        Ok(Self { root, path, span })
    }

    pub fn is_builtin(&self) -> bool {
        self.root.starts_with('$')
    }

    pub fn is_var(&self) -> bool {
        self.root == VARS_ROOT
    }

    /// True when the reference points at the result of another step.
    pub fn is_step(&self) -> bool {
        !self.is_builtin() && !self.is_var()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated `{{{{` at byte {offset}")]
    Unterminated { offset: usize },

    #[error("empty reference at byte {offset}")]
    Empty { offset: usize },

    #[error("invalid reference path `{expr}`")]
    InvalidPath { expr: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("`{0}` is not a known step, variable or built-in")]
    UnknownRoot(String),

    #[error("step `{0}` has no usable result")]
    Unusable(String),

    #[error("`{reference}` does not resolve: no `{segment}` under `{resolved}`")]
    MissingField {
        reference: String,
        resolved: String,
        segment: String,
    },

    #[error(transparent)]
    Malformed(#[from] TemplateError),
}

impl ExtractionError {
    /// Builds a `MissingField` for the segment at `depth` of `reference`.
    pub fn missing(reference: &Reference, depth: usize) -> Self {
        let mut resolved = reference.root.clone();
        for segment in &reference.path[..depth] {
            resolved.push('.');
            resolved.push_str(segment);
        }
        ExtractionError::MissingField {
            reference: reference.to_string(),
            resolved,
            segment: reference.path[depth].clone(),
        }
    }
}

/// Resolves references to values.
pub trait Lookup {
    fn lookup(&self, reference: &Reference) -> Result<Value, ExtractionError>;
}

/// Resolves built-in generators only. Used to evaluate scenario variables.
pub struct Builtins;

impl Lookup for Builtins {
    fn lookup(&self, reference: &Reference) -> Result<Value, ExtractionError> {
        let value =
            builtin(&reference.root).ok_or_else(|| ExtractionError::UnknownRoot(reference.root.clone()))?;
        if !reference.path.is_empty() {
            return Err(ExtractionError::missing(reference, 0));
        }
        Ok(value)
    }
}

/// Produces a fresh value for a built-in generator.
pub fn builtin(name: &str) -> Option<Value> {
    match name {
        "$uuid" => Some(Value::String(Uuid::new_v4().to_string())),
        "$random_email" => {
            let id = Uuid::new_v4();
            let domain = EMAIL_DOMAINS[id.as_bytes()[0] as usize % EMAIL_DOMAINS.len()];
            let local: String = id.simple().to_string().chars().take(12).collect();
            Some(Value::String(format!("{local}@{domain}")))
        }
        _ => None,
    }
}

/// Finds every `{{ ... }}` reference in `input`.
pub fn parse(input: &str) -> Result<Vec<Reference>, TemplateError> {
    let mut references = Vec::new();
    let mut cursor = 0;

    while let Some(found) = input[cursor..].find("{{") {
        let start = cursor + found;
        let inner = start + 2;
        let Some(len) = input[inner..].find("}}") else {
            return Err(TemplateError::Unterminated { offset: start });
        };
        let end = inner + len + 2;

        references.push(Reference::parse(input[inner..inner + len].trim(), start..end)?);
        cursor = end;
    }

    Ok(references)
}

/// All string leaves of a JSON value, depth first.
pub fn string_leaves(value: &Value) -> Vec<&str> {
    let mut leaves = Vec::new();
    collect_leaves(value, &mut leaves);
    leaves
}

fn collect_leaves<'a>(value: &'a Value, leaves: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => leaves.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_leaves(item, leaves)),
        Value::Object(map) => map.values().for_each(|item| collect_leaves(item, leaves)),
        _ => {}
    }
}

/// Walks `path` from `value`. On failure returns the depth of the first
/// segment that could not be resolved.
pub fn select<'a>(value: &'a Value, path: &[String]) -> Result<&'a Value, usize> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or(depth)?;
    }
    Ok(current)
}

/// Renders `input` as text, interpolating every reference.
pub fn render_str(input: &str, ctx: &impl Lookup) -> Result<String, ExtractionError> {
    let references = parse(input)?;
    if references.is_empty() {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for reference in &references {
        out.push_str(&input[last..reference.span.start]);
        out.push_str(&as_text(&ctx.lookup(reference)?));
        last = reference.span.end;
    }
    out.push_str(&input[last..]);

    Ok(out)
}

/// Renders every string leaf of `value`. A string consisting of exactly one
/// reference is replaced by the referenced value itself, keeping its type.
pub fn render_value(value: &Value, ctx: &impl Lookup) -> Result<Value, ExtractionError> {
    match value {
        Value::String(s) => {
            let references = parse(s)?;
            if let [only] = references.as_slice()
                && only.span == (0..s.len())
            {
                return ctx.lookup(only);
            }
            if references.is_empty() {
                Ok(value.clone())
            } else {
                render_str(s, ctx).map(Value::String)
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), render_value(item, ctx)?)))
            .collect::<Result<Map<_, _>, ExtractionError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
