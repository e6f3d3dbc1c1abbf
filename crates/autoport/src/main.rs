mod error;
mod presenter;
mod sink;

use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use db::{DBService, models::port_branch_state::PortBranchState};
use dialoguer::Input;
use error::CliError;
use git::{ChangeIdentifier, ProcessRunner, RepositoryIdentifier, RepositoryStore};
use indicatif::{ProgressBar, ProgressStyle};
use presenter::TerminalPresenter;
use secrecy::SecretString;
use services::services::{
    config::PorterConfig,
    conflicts::ConflictResolutionEngine,
    forge::{ForgeClient, GitHubClient, PullRequestStateFilter},
    history::{self, HistoryIndex},
    project::{PortOutcome, Project, ProjectContext},
    status::{StatusStream, StatusSubscription},
};
use sink::TerminalSink;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use utils::{status_msg::StatusChannel, text::pretty_duration};

// Rough cost of indexing one pull request against the REST API.
const SECONDS_PER_PULL_REQUEST: u64 = 4;

const WORKSPACE_CRATES: &[&str] = &["autoport", "services", "git", "db", "utils"];

#[derive(Parser, Debug)]
#[command(name = "autoport")]
#[command(
    about = "Ports pull requests from other forks into your repository, walking you through any conflicts, and answers which earlier changes a pull request builds on."
)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// GitHub token used for the API and for pushing
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Port a pull request (URL or org/name#N) into the home repository
    Port {
        change: String,

        /// Title of the opened pull request; defaults to the source title
        #[arg(long)]
        title: Option<String>,

        /// Add the change to an existing port branch instead of a new one
        #[arg(long)]
        branch: Option<String>,
    },
    /// Record the pull requests of a repository in the history index
    Index {
        repository: String,

        /// open, closed or all
        #[arg(long, default_value = "all")]
        state: PullRequestStateFilter,
    },
    /// Earlier merged changes touching the same files
    Ancestors { change: String },
    /// Later merged changes touching the files a change added
    Descendants { change: String },
    /// Indexed changes touching a path
    Search {
        path: String,

        /// Only search this repository
        #[arg(long)]
        repo: Option<String>,
    },
    /// Summarise a pull request
    Show { change: String },
    /// Port branches that `port --branch` can continue
    Branches,
}

fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "warn" };
        let directives = WORKSPACE_CRATES
            .iter()
            .map(|krate| format!("{krate}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::new(format!("warn,{directives}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider was already installed");
    }

    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // A conflict prompt still blocking on stdin would hold the runtime open.
    if code != 0 || presenter::prompt_abandoned() {
        std::io::stdout().flush()?;
        std::process::exit(code);
    }

    Ok(())
}

async fn run(args: Args) -> Result<(), CliError> {
    let mut config = match &args.config {
        Some(path) => PorterConfig::load_from(path),
        None => PorterConfig::load(),
    };
    let token = args.token.map(SecretString::from);

    match args.command {
        Command::Port {
            change,
            title,
            branch,
        } => {
            ensure_repositories(&mut config, args.config.as_deref())?;
            port(&config, require(token)?, change.parse()?, title, branch).await
        }
        Command::Index { repository, state } => {
            let index = history_index(&config, require(token)?).await?;
            index_repository(index, &config, &repository.parse()?, state).await
        }
        Command::Ancestors { change } => {
            let index = history_index(&config, require(token)?).await?;
            let change: ChangeIdentifier = change.parse()?;
            let spinner = create_spinner(&format!("Looking up ancestors of {change}..."));
            let found = index.ancestors(&change).await;
            spinner.finish_and_clear();
            print_changes(&history::render_changes(&found?), "No ancestors found");
            Ok(())
        }
        Command::Descendants { change } => {
            let index = history_index(&config, require(token)?).await?;
            let change: ChangeIdentifier = change.parse()?;
            let spinner = create_spinner(&format!("Looking up descendants of {change}..."));
            let found = index.descendants(&change).await;
            spinner.finish_and_clear();
            print_changes(&history::render_changes(&found?), "No descendants found");
            Ok(())
        }
        Command::Search { path, repo } => {
            let db = DBService::new(&config.database_path).await?;
            let repo = repo.map(|r| r.parse::<RepositoryIdentifier>()).transpose()?;
            let hits = history::search(&db, &path, repo.as_ref()).await?;
            print_changes(&hits, "No indexed change touches that path");
            Ok(())
        }
        Command::Show { change } => {
            let index = history_index(&config, require(token)?).await?;
            let spinner = create_spinner("Fetching pull request...");
            let summary = index.show(&change.parse()?).await;
            spinner.finish_and_clear();
            println!("{}", summary?);
            Ok(())
        }
        Command::Branches => {
            let db = DBService::new(&config.database_path).await?;
            let branches = PortBranchState::list(&db.pool).await?;
            let lines: Vec<String> = branches
                .iter()
                .map(|state| format!("{}  (last ported {})", state.branch, state.last_ported_change))
                .collect();
            print_changes(&lines, "No port branches recorded yet");
            Ok(())
        }
    }
}

fn require(token: Option<SecretString>) -> Result<SecretString, CliError> {
    token.ok_or(CliError::MissingToken)
}

fn forge(config: &PorterConfig, token: SecretString) -> Result<Arc<dyn ForgeClient>, CliError> {
    let client = GitHubClient::new(token)?.with_api_base(config.forge_api_base.clone());
    Ok(Arc::new(client))
}

async fn history_index(config: &PorterConfig, token: SecretString) -> Result<HistoryIndex, CliError> {
    let db = DBService::new(&config.database_path).await?;
    Ok(HistoryIndex::new(
        db,
        forge(config, token)?,
        config.history.clone(),
    ))
}

const HOME_PROMPT: &str = "Home repository, pull requests are opened here (org/name)";
const WORK_PROMPT: &str = "Work repository, your fork that branches are pushed to (org/name)";

/// Ask for whichever of the home and work repositories is not configured yet.
fn ensure_repositories(
    config: &mut PorterConfig,
    path: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let asked = fill_missing_repositories(config, |prompt| {
        Ok(Input::<String>::new()
            .with_prompt(prompt)
            .validate_with(validate_repository)
            .interact_text()?)
    })?;
    if !asked {
        return Ok(());
    }

    let saved = match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    };
    if let Err(e) = saved {
        debug!("Failed to save config: {}", e);
    }
    Ok(())
}

/// Fill unset repositories through `ask`; `false` when nothing was missing.
fn fill_missing_repositories<F>(config: &mut PorterConfig, mut ask: F) -> Result<bool, CliError>
where
    F: FnMut(&str) -> Result<String, CliError>,
{
    let mut asked = false;
    if config.home_repository.is_none() {
        config.home_repository = Some(ask(HOME_PROMPT)?);
        asked = true;
    }
    if config.work_repository.is_none() {
        config.work_repository = Some(ask(WORK_PROMPT)?);
        asked = true;
    }
    Ok(asked)
}

fn validate_repository(input: &String) -> Result<(), String> {
    input
        .parse::<RepositoryIdentifier>()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

async fn port(
    config: &PorterConfig,
    token: SecretString,
    change: ChangeIdentifier,
    title: Option<String>,
    branch: Option<String>,
) -> Result<(), CliError> {
    let store = RepositoryStore::new(&config.storage_root, Arc::new(ProcessRunner::new()))
        .with_web_base(config.forge_web_base.clone())
        .with_diff_tool(config.external_diff_tool.clone());
    let engine = ConflictResolutionEngine::new(Arc::new(TerminalPresenter))
        .with_round_timeout(config.round_timeout());
    let db = DBService::new(&config.database_path).await?;
    let ctx = ProjectContext::from_config(
        config,
        store,
        forge(config, token.clone())?,
        db,
        engine,
        token.clone(),
    )?;
    let stream = StatusStream::new(Box::new(TerminalSink::stdout()), &config.status).with_secret(token);

    let mut project = Project::create(ctx, stream).await?;
    if let Some(branch) = branch {
        if let Err(e) = project.resume_branch(&branch).await {
            project.close().await;
            return Err(e.into());
        }
    }

    match project.run(&change, title).await {
        PortOutcome::Completed {
            branch,
            pull_request,
            naive_resolution_applied,
        } => {
            println!();
            println!("Ported {change} onto {branch}");
            if let Some(pr) = pull_request {
                println!("  Pull request #{}: {}", pr.number, pr.html_url);
            }
            if naive_resolution_applied {
                println!("  Deleted files were staged as they stood; review before merging");
            }
            Ok(())
        }
        PortOutcome::Cancelled => {
            println!();
            println!("Port cancelled, the working copy is left mid-operation");
            Ok(())
        }
        PortOutcome::Failed(message) => Err(CliError::PortFailed(message)),
    }
}

async fn index_repository(
    index: HistoryIndex,
    config: &PorterConfig,
    repo: &RepositoryIdentifier,
    state: PullRequestStateFilter,
) -> Result<(), CliError> {
    let spinner = create_spinner(&format!("Listing pull requests of {repo}..."));
    let pending = index.pending_count(repo, state).await;
    let pending = match pending {
        Ok(pending) => pending,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "{pending} pull request(s) to index, this will take about {}",
        pretty_duration(pending as u64 * SECONDS_PER_PULL_REQUEST)
    ));

    let status = StatusChannel::new();
    let subscription = StatusSubscription::spawn(
        &status,
        StatusStream::new(Box::new(TerminalSink::stdout()), &config.status),
    );
    let index = index.with_status(status);
    let report = index.index_repository(repo, state).await;
    subscription.close().await;
    let report = report?;

    println!(
        "Indexed {} pull request(s) and {} file change(s) of {repo}",
        report.pull_requests, report.file_changes
    );
    if report.skipped > 0 {
        println!("  Skipped {} that could no longer be fetched", report.skipped);
    }
    let coverage = index.coverage(repo).await?;
    println!(
        "  The index now holds {} pull request(s) touching {} file(s) through {} change(s)",
        coverage.pull_requests, coverage.files, coverage.file_changes
    );
    Ok(())
}

fn print_changes(lines: &[String], empty: &str) {
    if lines.is_empty() {
        println!("{empty}");
    }
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn index_state_parses() {
        let args = Args::try_parse_from(["autoport", "index", "teamstarcup/starcup", "--state", "open"])
            .unwrap();
        match args.command {
            Command::Index { state, .. } => assert_eq!(state, PullRequestStateFilter::Open),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn only_missing_repositories_are_asked_for() {
        let mut config = PorterConfig {
            work_repository: Some("porter/starcup".into()),
            ..PorterConfig::default()
        };
        let mut prompts = Vec::new();
        let asked = fill_missing_repositories(&mut config, |prompt| {
            prompts.push(prompt.to_string());
            Ok("teamstarcup/starcup".into())
        })
        .unwrap();

        assert!(asked);
        assert_eq!(prompts, vec![HOME_PROMPT]);
        assert_eq!(config.home_repository.as_deref(), Some("teamstarcup/starcup"));
        assert_eq!(config.work_repository.as_deref(), Some("porter/starcup"));

        let asked_again = fill_missing_repositories(&mut config, |_| {
            panic!("nothing should be asked");
        })
        .unwrap();
        assert!(!asked_again);
    }

    #[test]
    fn branches_takes_no_arguments() {
        let args = Args::try_parse_from(["autoport", "branches"]).unwrap();
        assert!(matches!(args.command, Command::Branches));
    }

    #[test]
    fn port_accepts_a_resume_branch() {
        let args = Args::try_parse_from([
            "autoport",
            "port",
            "https://github.com/other-fork/upstream/pull/5",
            "--branch",
            "port-other-fork-upstream-4",
            "--token",
            "t",
        ])
        .unwrap();
        let Command::Port { change, branch, .. } = args.command else {
            panic!("expected port");
        };
        assert_eq!(change, "https://github.com/other-fork/upstream/pull/5");
        assert_eq!(branch.as_deref(), Some("port-other-fork-upstream-4"));
        assert_eq!(args.token.as_deref(), Some("t"));
    }
}
