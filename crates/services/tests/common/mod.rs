#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    io,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{indexed_file_change::FileChangeStatus, indexed_pull_request::PullRequestState};
use git::{
    ChangeIdentifier, CommandFailure, CommandOutput, CommandRunner, CommandSpec, GitCliError,
    RepositoryIdentifier, Resolution,
};
use services::services::{
    conflicts::{ConflictPresenter, RoundHandle},
    forge::{
        CreatePrRequest, CreatedPullRequest, ForgeClient, ForgeError, ForgeUser,
        PullRequestDetails, PullRequestFile, PullRequestRef, PullRequestStateFilter,
        PullRequestSummary, RepositoryDetails,
    },
    status::StatusSink,
};

pub const MARKER_STDOUT: &str = "Applying: Port lathe\nCONFLICT (modify/delete): foo.txt deleted in HEAD and modified in foo.txt. Version of foo.txt left in tree.\n";
pub const CONTENT_STDOUT: &str =
    "Applying: Port lathe\nCONFLICT (content): Merge conflict in a.yml\n";

pub fn ok(stdout: &str) -> Result<CommandOutput, CommandFailure> {
    Ok(CommandOutput::stdout(stdout))
}

pub fn fail(stdout: &str, stderr: &str) -> Result<CommandOutput, CommandFailure> {
    Err(CommandFailure::new(stdout, stderr, 1))
}

struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<Result<CommandOutput, CommandFailure>>,
}

/// Answers git invocations from a script instead of spawning processes.
///
/// Rules match on an argument prefix, first declared rule wins. Each rule
/// replays its responses in order and keeps repeating the last one; commands
/// without a rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, prefix: &[&str], response: Result<CommandOutput, CommandFailure>) {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.prefix == prefix) {
            Some(rule) => rule.responses.push_back(response),
            None => rules.push(Rule {
                prefix,
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn ran(&self, args: &[&str]) -> bool {
        self.invocations()
            .iter()
            .any(|inv| inv.iter().map(String::as_str).eq(args.iter().copied()))
    }

    pub fn count(&self, prefix: &[&str]) -> usize {
        self.invocations()
            .iter()
            .filter(|inv| starts_with(inv, prefix))
            .count()
    }
}

fn starts_with(args: &[String], prefix: &[impl AsRef<str>]) -> bool {
    args.len() >= prefix.len() && prefix.iter().zip(args).all(|(p, a)| p.as_ref() == a)
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        _working_dir: &Path,
    ) -> Result<CommandOutput, GitCliError> {
        let args = command.args_lossy();
        self.invocations.lock().unwrap().push(args.clone());

        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| starts_with(&args, &r.prefix)) else {
            return Ok(CommandOutput::default());
        };
        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        };
        match response {
            Some(Ok(out)) => Ok(out),
            Some(Err(failure)) => Err(GitCliError::CommandFailed(failure)),
            None => Ok(CommandOutput::default()),
        }
    }
}

#[derive(Default)]
struct ForgeState {
    repositories: HashMap<String, RepositoryDetails>,
    pull_requests: HashMap<(String, u64), PullRequestDetails>,
    files: HashMap<(String, u64), Vec<PullRequestFile>>,
    parent_counts: HashMap<String, usize>,
    patches: HashMap<String, String>,
    created: Vec<(String, CreatePrRequest)>,
    comments: Vec<(String, u64, String)>,
}

/// In-memory forge keyed by `org/name`.
pub struct FakeForge {
    login: String,
    state: Mutex<ForgeState>,
}

impl FakeForge {
    pub fn new(login: &str) -> Arc<Self> {
        Arc::new(Self {
            login: login.to_string(),
            state: Mutex::new(ForgeState::default()),
        })
    }

    pub fn add_repository(&self, full_name: &str, default_branch: &str) {
        self.state.lock().unwrap().repositories.insert(
            full_name.to_string(),
            RepositoryDetails {
                full_name: full_name.to_string(),
                default_branch: default_branch.to_string(),
            },
        );
    }

    pub fn add_pull_request(
        &self,
        repo: &str,
        details: PullRequestDetails,
        files: Vec<PullRequestFile>,
    ) {
        let mut state = self.state.lock().unwrap();
        let key = (repo.to_string(), details.number);
        state
            .patches
            .insert(details.patch_url.clone(), format!("From: patch of #{}\n", details.number));
        state.files.insert(key.clone(), files);
        state.pull_requests.insert(key, details);
    }

    pub fn set_parent_count(&self, sha: &str, parents: usize) {
        self.state
            .lock()
            .unwrap()
            .parent_counts
            .insert(sha.to_string(), parents);
    }

    pub fn created(&self) -> Vec<(String, CreatePrRequest)> {
        self.state.lock().unwrap().created.clone()
    }

    /// `(repo, number, body)` of every comment posted.
    pub fn comments(&self) -> Vec<(String, u64, String)> {
        self.state.lock().unwrap().comments.clone()
    }
}

fn not_found(what: impl std::fmt::Display) -> ForgeError {
    ForgeError::NotFound(format!("{what} does not exist"))
}

#[async_trait]
impl ForgeClient for FakeForge {
    async fn get_pull_request(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<PullRequestDetails, ForgeError> {
        let key = (change.repository().to_string(), change.number());
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(change))
    }

    async fn download_patch(&self, patch_url: &str) -> Result<String, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .patches
            .get(patch_url)
            .cloned()
            .ok_or_else(|| not_found(patch_url))
    }

    async fn commit_parent_count(
        &self,
        _repo: &RepositoryIdentifier,
        sha: &str,
    ) -> Result<usize, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .parent_counts
            .get(sha)
            .copied()
            .ok_or_else(|| not_found(sha))
    }

    async fn list_pull_request_files(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<Vec<PullRequestFile>, ForgeError> {
        let key = (change.repository().to_string(), change.number());
        self.state
            .lock()
            .unwrap()
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(change))
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryIdentifier,
        request: &CreatePrRequest,
    ) -> Result<CreatedPullRequest, ForgeError> {
        let mut state = self.state.lock().unwrap();
        state.created.push((repo.to_string(), request.clone()));
        let number = 1000 + state.created.len() as u64;
        Ok(CreatedPullRequest {
            number,
            html_url: format!("https://github.com/{repo}/pull/{number}"),
        })
    }

    async fn create_comment(
        &self,
        repo: &RepositoryIdentifier,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        self.state
            .lock()
            .unwrap()
            .comments
            .push((repo.to_string(), number, body.to_string()));
        Ok(())
    }

    async fn list_pull_requests(
        &self,
        repo: &RepositoryIdentifier,
        state: PullRequestStateFilter,
    ) -> Result<Vec<PullRequestSummary>, ForgeError> {
        let repo = repo.to_string();
        let guard = self.state.lock().unwrap();
        let mut summaries: Vec<PullRequestSummary> = guard
            .pull_requests
            .iter()
            .filter(|((r, _), _)| *r == repo)
            .filter(|(_, pr)| match state {
                PullRequestStateFilter::All => true,
                PullRequestStateFilter::Open => pr.state == PullRequestState::Open,
                PullRequestStateFilter::Closed => pr.state == PullRequestState::Closed,
            })
            .map(|(_, pr)| PullRequestSummary {
                number: pr.number,
                title: pr.title.clone(),
                state: pr.state,
            })
            .collect();
        summaries.sort_by_key(|s| s.number);
        Ok(summaries)
    }

    async fn get_repository(
        &self,
        repo: &RepositoryIdentifier,
    ) -> Result<RepositoryDetails, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .repositories
            .get(&repo.to_string())
            .cloned()
            .ok_or_else(|| not_found(repo))
    }

    async fn authenticated_user(&self) -> Result<ForgeUser, ForgeError> {
        Ok(ForgeUser {
            login: self.login.clone(),
        })
    }
}

fn at(day: u32) -> DateTime<Utc> {
    format!("2024-03-{day:02}T12:00:00Z").parse().unwrap()
}

/// Pull request opened on day `created_day` and, when given, merged on `merged_day`.
pub fn pull_request(
    repo: &str,
    number: u64,
    title: &str,
    created_day: u32,
    merged_day: Option<u32>,
) -> PullRequestDetails {
    PullRequestDetails {
        number,
        title: title.to_string(),
        body: Some(format!("Body of {title}")),
        state: if merged_day.is_some() {
            PullRequestState::Closed
        } else {
            PullRequestState::Open
        },
        merged: merged_day.is_some(),
        additions: 10,
        deletions: 2,
        changed_files: 1,
        commits: 1,
        comments: 0,
        base: PullRequestRef {
            ref_name: "master".into(),
            sha: "base".into(),
        },
        head: PullRequestRef {
            ref_name: format!("feature-{number}"),
            sha: format!("head{number}"),
        },
        user: Some(ForgeUser {
            login: "octocat".into(),
        }),
        html_url: format!("https://github.com/{repo}/pull/{number}"),
        patch_url: format!("https://github.com/{repo}/pull/{number}.patch"),
        merge_commit_sha: merged_day.map(|_| format!("merge{number}")),
        created_at: at(created_day),
        updated_at: None,
        closed_at: merged_day.map(at),
        merged_at: merged_day.map(at),
    }
}

pub fn file(filename: &str, status: FileChangeStatus) -> PullRequestFile {
    PullRequestFile {
        filename: filename.to_string(),
        status,
        additions: 1,
        deletions: 0,
        changes: 1,
        previous_filename: None,
        patch: Some("@@ -0,0 +1 @@".into()),
        sha: Some(format!("blob-{filename}")),
    }
}

/// Keeps every segment emission, in order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    emissions: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn emissions(&self) -> Vec<String> {
        self.emissions.lock().unwrap().clone()
    }

    pub fn transcript(&self) -> String {
        self.emissions().join("\n")
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send_new(&self, text: &str) -> io::Result<()> {
        self.emissions.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn edit_current(&self, text: &str) -> io::Result<()> {
        self.emissions.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub enum Behaviour {
    /// Apply the same resolution to every conflict and submit.
    Take(Resolution),
    Cancel,
    /// Hold on to the round without ever deciding.
    Stall,
    /// Drop the round without deciding.
    Abandon,
}

/// Presenter that answers every round the same way.
pub struct AutoPresenter {
    behaviour: Behaviour,
    rounds: Mutex<Vec<(usize, usize)>>,
}

impl AutoPresenter {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            rounds: Mutex::new(Vec::new()),
        })
    }

    /// `(round, conflict count)` per presented round.
    pub fn rounds(&self) -> Vec<(usize, usize)> {
        self.rounds.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConflictPresenter for AutoPresenter {
    async fn present(&self, round: RoundHandle) {
        self.rounds
            .lock()
            .unwrap()
            .push((round.round(), round.progress().total));

        match &self.behaviour {
            Behaviour::Take(resolution) => {
                for index in 0..round.progress().total {
                    round.decide(index, resolution.clone()).unwrap();
                }
                round.submit().unwrap();
            }
            Behaviour::Cancel => round.cancel().unwrap(),
            Behaviour::Stall => std::future::pending::<()>().await,
            Behaviour::Abandon => drop(round),
        }
    }
}
