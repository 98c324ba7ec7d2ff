use serde_json::Map;
use serde_json::Value;

use crate::case::TestCase;
use crate::template;
use crate::template::Builtins;
use crate::template::ExtractionError;
use crate::template::Lookup;
use crate::template::Reference;

/// An ordered chain of test cases, split into named groups for reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scenario {
    pub vars: Map<String, Value>,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub cases: Vec<TestCase>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn with_group(mut self, name: impl Into<String>, cases: Vec<TestCase>) -> Self {
        self.groups.push(Group {
            name: name.into(),
            cases,
        });
        self
    }

    /// Number of test cases across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluates the variables once, top to bottom. Built-ins are generated
    /// here so that every step referencing a variable sees the same value.
    pub fn evaluate_vars(&self) -> Result<Value, ExtractionError> {
        let mut evaluated = Map::with_capacity(self.vars.len());
        for (name, value) in &self.vars {
            let rendered = template::render_value(value, &EarlierVars(&evaluated))?;
            evaluated.insert(name.clone(), rendered);
        }
        Ok(Value::Object(evaluated))
    }
}

/// Built-ins plus the variables evaluated so far.
struct EarlierVars<'a>(&'a Map<String, Value>);

impl Lookup for EarlierVars<'_> {
    fn lookup(&self, reference: &Reference) -> Result<Value, ExtractionError> {
        if reference.is_builtin() {
            return Builtins.lookup(reference);
        }
        if !reference.is_var() {
            return Err(ExtractionError::UnknownRoot(reference.root.clone()));
        }

        let Some((name, rest)) = reference.path.split_first() else {
            return Ok(Value::Object(self.0.clone()));
        };
        let value = self
            .0
            .get(name)
            .ok_or_else(|| ExtractionError::missing(reference, 0))?;
        template::select(value, rest)
            .cloned()
            .map_err(|depth| ExtractionError::missing(reference, depth + 1))
    }
}
