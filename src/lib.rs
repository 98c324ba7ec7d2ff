//! Declarative HTTP integration tests that pass data from step to step.
//!
//! A scenario is an ordered chain of [`TestCase`](case::TestCase)s. Each case
//! is one HTTP call plus the status it must return; later cases read fields
//! from the responses of earlier ones through `{{ step_id.path }}` references.
//! The [`Runner`](runner::Runner) executes the chain in order and skips the
//! dependents of any step that did not succeed.

#![allow(clippy::result_large_err)]

pub mod asserter;
pub mod case;
pub mod config;
pub mod history;
pub mod outputter;
pub mod parser;
pub mod runner;
pub mod scenario;
pub mod template;
pub mod validator;
