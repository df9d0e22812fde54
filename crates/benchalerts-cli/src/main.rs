//! benchalerts - report Conbench regressions to GitHub
//!
//! ## Commands
//!
//! - `status`: post a commit status summarizing regressions
//! - `check`: post a check run with the full Markdown report (GitHub App only)
//! - `comment`: comment the report on a pull request
//!
//! Credentials and server settings come from the environment (a `.env`
//! file in the working directory is loaded first).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{error, warn, Level};

use benchalerts::config::{parse_z_score_threshold, Z_SCORE_THRESHOLD};
use benchalerts::{
    comment_regressions_on_pull_request, update_github_check_based_on_regressions,
    update_github_status_based_on_regressions, AlertSettings, ConbenchClient, GitHubRepoClient,
    PullRequestRef, RegressionOptions,
};

#[derive(Parser)]
#[command(name = "benchalerts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Post Conbench regression analysis to GitHub", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a commit status on the contender commit
    Status(ReportArgs),

    /// Post a check run on the contender commit
    Check(ReportArgs),

    /// Comment the regression report on a pull request
    Comment {
        #[command(flatten)]
        report: ReportArgs,

        /// Pull request number (default: the single PR containing the commit)
        #[arg(long)]
        pr: Option<u64>,
    },
}

#[derive(Args)]
struct ReportArgs {
    /// Repository in the form owner/repo
    #[arg(long)]
    repo: String,

    /// Full SHA of the contender commit
    #[arg(long)]
    sha: String,

    /// Z-score threshold passed to Conbench (default: Z_SCORE_THRESHOLD)
    #[arg(long, value_parser = parse_threshold)]
    z_score_threshold: Option<f64>,

    /// Don't warn when the baseline isn't the contender's parent commit
    #[arg(long)]
    no_baseline_parent_warning: bool,
}

impl ReportArgs {
    fn options(&self, settings: &AlertSettings) -> RegressionOptions {
        RegressionOptions::from_settings(&self.sha, settings)
            .with_baseline_parent_warning(!self.no_baseline_parent_warning)
    }
}

/// Resolve settings, with `--z-score-threshold` replacing `Z_SCORE_THRESHOLD`.
///
/// The variable is only read when the flag is absent.
fn load_settings<F>(threshold_flag: Option<f64>, lookup: F) -> benchalerts::Result<AlertSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = AlertSettings::from_lookup(|key| match threshold_flag {
        Some(_) if key == Z_SCORE_THRESHOLD => None,
        _ => lookup(key),
    })?;
    if threshold_flag.is_some() {
        settings.z_score_threshold = threshold_flag;
    }
    Ok(settings)
}

fn parse_threshold(raw: &str) -> std::result::Result<f64, String> {
    parse_z_score_threshold(raw).map_err(|_| format!("{Z_SCORE_THRESHOLD} must be a positive number"))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    benchalerts::init_tracing(cli.json, level);

    match run(cli.command).await {
        Ok(res) => println!("{}", serde_json::to_string_pretty(&res).unwrap_or_default()),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands) -> Result<Value> {
    let (report, pr) = match &command {
        Commands::Status(report) | Commands::Check(report) => (report, None),
        Commands::Comment { report, pr } => (report, *pr),
    };

    let settings = load_settings(report.z_score_threshold, |key| std::env::var(key).ok())
        .context("Failed to read settings from environment")?;

    if matches!(command, Commands::Check(_)) && !settings.github.is_app() {
        warn!("Check runs can only be posted with GitHub App credentials");
    }

    let github = GitHubRepoClient::new(&report.repo, &settings.github)
        .await
        .context("Failed to authenticate with GitHub")?;
    let conbench =
        ConbenchClient::new(&settings.conbench).context("Failed to create Conbench client")?;
    let options = report.options(&settings);

    let res = match command {
        Commands::Status(_) => {
            update_github_status_based_on_regressions(&github, &conbench, &options).await
        }
        Commands::Check(_) => {
            update_github_check_based_on_regressions(&github, &conbench, &options).await
        }
        Commands::Comment { .. } => {
            let target = match pr {
                Some(number) => PullRequestRef::Number(number),
                None => PullRequestRef::CommitSha(options.contender_sha.clone()),
            };
            comment_regressions_on_pull_request(&github, &conbench, &options, &target).await
        }
    };
    res.with_context(|| format!("Failed to report regressions for {}", options.contender_sha))
}
