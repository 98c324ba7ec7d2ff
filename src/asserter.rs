use core::fmt;
use std::fmt::Display;

use reqwest::StatusCode;

use crate::case::CaseError;
use crate::case::CaseResult;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Exact equality. No ranges, no tolerance.
pub fn assert_status(expected: StatusCode, actual: Option<StatusCode>) -> Verdict {
    match actual {
        Some(actual) if actual == expected => Verdict::Pass,
        _ => Verdict::Fail,
    }
}

/// Expected-versus-actual explanation of a case that did not pass, used by
/// the failure summary.
pub struct Explanation<'a>(pub &'a CaseResult);

const BODY_PREVIEW_CHARS: usize = 160;

impl Display for Explanation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;

        match (&result.error, result.status_code) {
            (Some(CaseError::Skipped { blocked_by }), _) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("⏭").yellow().bold(),
                    console::style("SKIPPED!").yellow().bold(),
                )?;
                writeln!(
                    f,
                    "  {} {}",
                    console::style("Depends on").yellow(),
                    console::style(format!("`{blocked_by}`, which did not succeed")).bold()
                )
            }

            (Some(error), None) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                writeln!(
                    f,
                    "  {} {}",
                    console::style("Request failed with error:").red(),
                    console::style(error).red().bold()
                )
            }

            (error, Some(status)) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                writeln!(
                    f,
                    "  Expected: {}",
                    console::style(format!("Expected status {}", result.expected_status)).green()
                )?;
                writeln!(
                    f,
                    "  Actual:   {}",
                    console::style(format!("Got status {status}")).red()
                )?;
                if let Some(error) = error {
                    writeln!(f, "  Error:    {}", console::style(error).red())?;
                }
                writeln!(
                    f,
                    "  Body:     {}",
                    console::style(result.body.preview(BODY_PREVIEW_CHARS)).dim()
                )
            }

            (None, None) => {
                writeln!(
                    f,
                    "{} {} (no response and no error recorded)",
                    console::style("⚠").yellow(),
                    console::style("UNKNOWN RESULT").yellow().bold()
                )
            }
        }
    }
}
