use console::Style;
use console::Term;
use flume::Receiver;

use crate::asserter::Explanation;
use crate::case::CaseResult;
use crate::runner::Event;

pub struct OutPutter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputSummary {
    pub passed: usize,
    pub failed: usize,
}

impl OutPutter {
    /// Prints events as they arrive until every sender is dropped, then the
    /// failure summary.
    pub async fn start(rx: Receiver<Event>, scenario_path: &str, n_cases: usize) -> OutputSummary {
        let style = Style::new().bold().cyan();
        let open_text =
            format!("Running scenario: {scenario_path} Found {n_cases} test cases: Running...");
        println!("{}", style.apply_to(open_text));

        let width = usize::from(Term::stdout().size().1).max(20);
        let mut i = 1;
        let mut summary = OutputSummary::default();
        let mut failed: Vec<CaseResult> = vec![];

        while let Ok(event) = rx.recv_async().await {
            match event {
                Event::Group { name, cases } => {
                    println!();
                    println!("{}", group_banner(&name, cases));
                    println!("{}", "-".repeat(width));
                }
                Event::Case(result) => {
                    println!("{}", case_line(i, n_cases, &result));
                    // A matching status with an unreadable body still fails the run.
                    if result.is_usable() {
                        summary.passed += 1;
                    } else {
                        summary.failed += 1;
                        failed.push(result);
                    }
                    i += 1;
                }
                Event::Aborted { case } => {
                    println!(
                        "{}",
                        console::style(format!("Chain broken at `{case}`, remaining cases not run"))
                            .red()
                            .bold()
                    );
                }
            }
        }

        println!();
        if failed.is_empty() {
            println!("{}", console::style("All tests passed! 🎉").bold().green());
        } else {
            println!("{}", console::style("Summary of Failed Tests:").bold().red());
            for (idx, result) in failed.iter().enumerate() {
                println!("\n{} {}. {}", idx + 1, result.name, Explanation(result));
            }
        }

        summary
    }
}

fn group_banner(name: &str, cases: usize) -> String {
    let noun = if cases == 1 { "case" } else { "cases" };
    format!(
        "{} {} {}",
        console::style("[Backend]").yellow(),
        console::style(format!("Testing {name}")).cyan(),
        console::style(format!("({cases} {noun})")).dim()
    )
}

/// One console line per executed case: `[i/n] ✔ name → 200 PASS!`.
pub fn case_line(index: usize, total: usize, result: &CaseResult) -> String {
    let observed = match (result.status_code, result.is_skipped()) {
        (Some(status), _) => status.as_u16().to_string(),
        (None, true) => "skipped".to_string(),
        (None, false) => "no response".to_string(),
    };

    let mut line = if result.is_usable() {
        format!(
            "[{index}/{total}] {}  {} → {} {}",
            console::style("✔").green().bold(),
            result.name,
            observed,
            console::style("PASS!").green().bold(),
        )
    } else {
        format!(
            "[{index}/{total}] {}  {} → {} {}",
            console::style("╳").red().bold(),
            result.name,
            observed,
            console::style("FAILED!").red().bold(),
        )
    };

    if let Some(error) = &result.error {
        line.push_str(&format!("\n      {}", console::style(error).dim()));
    }

    line
}
