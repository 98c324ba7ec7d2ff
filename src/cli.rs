use clap::Parser;

/// Runs a chain of HTTP test cases against a live backend
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the scenario file
    #[arg(short, long, default_value = "stafett/stafett.toml")]
    pub path: String,

    /// Base URL of the service under test, overrides `setup.base_url`
    #[arg(long)]
    pub base_url: Option<String>,

    /// Per-call timeout in seconds, overrides `setup.timeout_secs`
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Stop at the first broken chain instead of skipping the dependent cases
    #[arg(long)]
    pub fail_fast: bool,
}
