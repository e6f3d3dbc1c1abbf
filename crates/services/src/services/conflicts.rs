//! Conflict handling for a stopped `am` or `cherry-pick`.
//!
//! Resolution runs in two stages. The naive loop stages everything when git
//! only complains about files deleted on our side. Anything else is handed to
//! a [`ConflictPresenter`] one round at a time until the operation continues
//! cleanly or the operator cancels.

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use git::{
    ApplyPatchOptions, ConflictFailure, ConflictOp, LocalRepository, MergeConflict,
    RepositoryError, Resolution,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use utils::status_msg::StatusMsg;

/// Output fragment of a modify/delete conflict where our side deleted the file.
pub const NAIVE_RESOLUTION_MARKER: &str = "deleted in HEAD and modified in";

pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(15 * 60);

static INDUCTED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CONFLICT \(modify/delete\): (.+?) deleted in HEAD and modified in").unwrap()
});

/// Result of the naive resolution loop. `inducted_files` are the files the
/// loop brought in because our side had deleted them.
#[derive(Debug)]
pub enum NaiveOutcome {
    /// The operation continued cleanly after staging everything.
    Resolved { inducted_files: Vec<String> },
    /// Conflicts remain; `failure` is the most recent one.
    Remaining {
        failure: Box<ConflictFailure>,
        attempts: usize,
        inducted_files: Vec<String>,
    },
}

/// Paths named by modify/delete conflicts where HEAD deleted the file, in
/// order of first appearance.
pub fn inducted_paths(output: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for caps in INDUCTED_PATH.captures_iter(output) {
        let path = &caps[1];
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

/// Stage everything and continue while the only complaints are files deleted
/// in HEAD. Bounded by the number of such complaints in the first failure.
pub async fn run_naive_resolution(
    repo: &LocalRepository,
    failure: ConflictFailure,
) -> Result<NaiveOutcome, RepositoryError> {
    let cap = failure
        .failure
        .stdout
        .matches(NAIVE_RESOLUTION_MARKER)
        .count()
        .max(1);
    let mut latest = failure;
    let mut attempts = 0;
    let mut inducted_files: Vec<String> = Vec::new();

    while attempts < cap {
        if !latest.failure.stdout.contains(NAIVE_RESOLUTION_MARKER) {
            break;
        }
        attempts += 1;
        for path in inducted_paths(&latest.failure.stdout) {
            if !inducted_files.contains(&path) {
                inducted_files.push(path);
            }
        }
        repo.publish(StatusMsg::comment(format!(
            "Files deleted in HEAD were modified upstream, staging everything ({attempts}/{cap})"
        )));
        repo.add_all().await?;

        match repo.continue_merge(latest.operation).await {
            Ok(()) => {
                tracing::info!(repo = %repo.id(), attempts, "Naive resolution succeeded");
                return Ok(NaiveOutcome::Resolved { inducted_files });
            }
            Err(RepositoryError::Conflict(next)) => latest = *next,
            Err(err) => return Err(err),
        }
    }

    Ok(NaiveOutcome::Remaining {
        failure: Box::new(latest),
        attempts,
        inducted_files,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundProgress {
    pub resolved: usize,
    pub total: usize,
}

#[derive(Debug)]
pub enum RoundDecision {
    Continue(Vec<MergeConflict>),
    Cancel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    #[error("{remaining} conflict(s) still need a decision")]
    Undecided { remaining: usize },
    #[error("no conflict at index {index}")]
    NoSuchConflict { index: usize },
    #[error("this conflict round is already closed")]
    Closed,
}

struct RoundState {
    conflicts: Vec<MergeConflict>,
    completion: Option<oneshot::Sender<RoundDecision>>,
}

impl RoundState {
    fn remaining(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_decided()).count()
    }
}

/// Shared view of one interactive round. Clones refer to the same round; the
/// round is cancelled when the last clone is dropped without submitting.
#[derive(Clone)]
pub struct RoundHandle {
    round: usize,
    operation: ConflictOp,
    state: Arc<Mutex<RoundState>>,
}

impl RoundHandle {
    fn new(
        round: usize,
        operation: ConflictOp,
        conflicts: Vec<MergeConflict>,
        completion: oneshot::Sender<RoundDecision>,
    ) -> Self {
        Self {
            round,
            operation,
            state: Arc::new(Mutex::new(RoundState {
                conflicts,
                completion: Some(completion),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 1-based round number.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn operation(&self) -> ConflictOp {
        self.operation
    }

    pub fn conflicts(&self) -> Vec<MergeConflict> {
        self.lock().conflicts.clone()
    }

    pub fn decide(&self, index: usize, resolution: Resolution) -> Result<(), RoundError> {
        let mut state = self.lock();
        if state.completion.is_none() {
            return Err(RoundError::Closed);
        }
        let conflict = state
            .conflicts
            .get_mut(index)
            .ok_or(RoundError::NoSuchConflict { index })?;
        conflict.set_resolution(resolution);
        Ok(())
    }

    pub fn progress(&self) -> RoundProgress {
        let state = self.lock();
        RoundProgress {
            resolved: state.conflicts.len() - state.remaining(),
            total: state.conflicts.len(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.lock().remaining()
    }

    pub fn can_continue(&self) -> bool {
        let state = self.lock();
        state.completion.is_some() && state.remaining() == 0
    }

    /// Hand every decision to the engine. Fails while any conflict is undecided.
    pub fn submit(&self) -> Result<(), RoundError> {
        let mut state = self.lock();
        if state.completion.is_none() {
            return Err(RoundError::Closed);
        }
        let remaining = state.remaining();
        if remaining > 0 {
            return Err(RoundError::Undecided { remaining });
        }
        let decision = RoundDecision::Continue(state.conflicts.clone());
        match state.completion.take() {
            Some(tx) => tx.send(decision).map_err(|_| RoundError::Closed),
            None => Err(RoundError::Closed),
        }
    }

    pub fn cancel(&self) -> Result<(), RoundError> {
        match self.lock().completion.take() {
            Some(tx) => tx.send(RoundDecision::Cancel).map_err(|_| RoundError::Closed),
            None => Err(RoundError::Closed),
        }
    }
}

/// Presentation layer for interactive rounds.
///
/// `present` may drive the round to completion itself or hand the handle off
/// and return; the engine waits for the round either way.
#[async_trait]
pub trait ConflictPresenter: Send + Sync {
    async fn present(&self, round: RoundHandle);
}

/// One step of a port that may stop on conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStep {
    Patch { path: PathBuf },
    CherryPick { sha: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        naive_resolution_applied: bool,
        inducted_files: Vec<String>,
    },
    Cancelled,
}

impl ApplyOutcome {
    fn clean() -> Self {
        ApplyOutcome::Applied {
            naive_resolution_applied: false,
            inducted_files: Vec::new(),
        }
    }
}

pub struct ConflictResolutionEngine {
    presenter: Arc<dyn ConflictPresenter>,
    round_timeout: Duration,
}

impl ConflictResolutionEngine {
    pub fn new(presenter: Arc<dyn ConflictPresenter>) -> Self {
        Self {
            presenter,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
        }
    }

    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }

    /// Run `step` and see it through any conflicts it stops on.
    pub async fn apply_resolving(
        &self,
        repo: &LocalRepository,
        step: &PortStep,
    ) -> Result<ApplyOutcome, RepositoryError> {
        let result = match step {
            PortStep::Patch { path } => {
                repo.apply_patch(path, ApplyPatchOptions { three_way: true })
                    .await
            }
            PortStep::CherryPick { sha } => repo.cherry_pick(sha).await,
        };

        match result {
            Ok(()) => Ok(ApplyOutcome::clean()),
            Err(RepositoryError::Conflict(failure)) => self.resolve(repo, *failure).await,
            Err(err) => Err(err),
        }
    }

    /// Naive loop first, then interactive rounds for whatever is left.
    pub async fn resolve(
        &self,
        repo: &LocalRepository,
        failure: ConflictFailure,
    ) -> Result<ApplyOutcome, RepositoryError> {
        match run_naive_resolution(repo, failure).await? {
            NaiveOutcome::Resolved { inducted_files } => Ok(ApplyOutcome::Applied {
                naive_resolution_applied: true,
                inducted_files,
            }),
            NaiveOutcome::Remaining {
                failure,
                attempts,
                inducted_files,
            } => {
                match self.resolve_interactively(repo, *failure).await? {
                    ApplyOutcome::Applied { .. } => Ok(ApplyOutcome::Applied {
                        naive_resolution_applied: attempts > 0,
                        inducted_files,
                    }),
                    ApplyOutcome::Cancelled => Ok(ApplyOutcome::Cancelled),
                }
            }
        }
    }

    pub async fn resolve_interactively(
        &self,
        repo: &LocalRepository,
        failure: ConflictFailure,
    ) -> Result<ApplyOutcome, RepositoryError> {
        let mut failure = failure;
        let mut round = 1;

        loop {
            repo.publish(StatusMsg::standard(format!(
                "git {} stopped with {} conflicted file(s), waiting for decisions (round {round})",
                failure.operation,
                failure.conflicts.len()
            )));

            let conflicts = match self.run_round(round, &failure).await {
                RoundDecision::Continue(conflicts) => conflicts,
                RoundDecision::Cancel => {
                    repo.publish(StatusMsg::comment("Conflict resolution cancelled"));
                    tracing::info!(repo = %repo.id(), round, "Conflict resolution cancelled");
                    return Ok(ApplyOutcome::Cancelled);
                }
            };

            for conflict in &conflicts {
                conflict.resolve(repo).await?;
            }

            match repo.continue_merge(failure.operation).await {
                Ok(()) => return Ok(ApplyOutcome::clean()),
                Err(RepositoryError::Conflict(next)) => {
                    failure = *next;
                    round += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_round(&self, round: usize, failure: &ConflictFailure) -> RoundDecision {
        let (tx, rx) = oneshot::channel();
        let handle = RoundHandle::new(round, failure.operation, failure.conflicts.clone(), tx);
        let presenting = self.presenter.present(handle);

        let decided = async move {
            presenting.await;
            // A handle dropped without a decision closes the channel.
            rx.await.unwrap_or(RoundDecision::Cancel)
        };

        tokio::select! {
            decision = decided => decision,
            _ = tokio::time::sleep(self.round_timeout) => {
                tracing::warn!(round, timeout = ?self.round_timeout, "Conflict round timed out");
                RoundDecision::Cancel
            }
        }
    }
}
