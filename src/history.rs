use std::collections::HashMap;

use serde_json::Value;

use crate::case::Body;
use crate::case::CaseResult;
use crate::template;
use crate::template::Builtins;
use crate::template::ExtractionError;
use crate::template::Lookup;
use crate::template::Reference;

/// Append-only record of the steps executed so far, plus the evaluated
/// scenario variables. Later steps only ever read from it.
#[derive(Debug, Default)]
pub struct History {
    vars: Value,
    results: Vec<CaseResult>,
    by_id: HashMap<String, usize>,
}

impl History {
    pub fn new(vars: Value) -> Self {
        Self {
            vars,
            results: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn push(&mut self, result: CaseResult) {
        if let Some(id) = &result.id {
            self.by_id.insert(id.clone(), self.results.len());
        }
        self.results.push(result);
    }

    pub fn get(&self, id: &str) -> Option<&CaseResult> {
        self.by_id.get(id).map(|&index| &self.results[index])
    }

    pub fn into_results(self) -> Vec<CaseResult> {
        self.results
    }

    /// The first of `ids` whose result cannot feed a dependent step.
    pub fn first_unusable<'a>(&self, ids: &'a [String]) -> Option<&'a str> {
        ids.iter()
            .find(|id| !self.get(id).is_some_and(CaseResult::is_usable))
            .map(String::as_str)
    }
}

impl Lookup for History {
    fn lookup(&self, reference: &Reference) -> Result<Value, ExtractionError> {
        if reference.is_builtin() {
            return Builtins.lookup(reference);
        }

        if reference.is_var() {
            return template::select(&self.vars, &reference.path)
                .cloned()
                .map_err(|depth| ExtractionError::missing(reference, depth));
        }

        let result = self
            .get(&reference.root)
            .ok_or_else(|| ExtractionError::UnknownRoot(reference.root.clone()))?;

        if !result.is_usable() {
            return Err(ExtractionError::Unusable(reference.root.clone()));
        }

        match &result.body {
            Body::Json(body) => template::select(body, &reference.path)
                .cloned()
                .map_err(|depth| ExtractionError::missing(reference, depth)),
            Body::Text(text) if reference.path.is_empty() => Ok(Value::String(text.clone())),
            Body::Text(_) => Err(ExtractionError::missing(reference, 0)),
        }
    }
}
