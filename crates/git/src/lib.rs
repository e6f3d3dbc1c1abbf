use std::{
    collections::HashSet,
    ffi::{OsStr, OsString},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::{
    status_msg::{StatusChannel, StatusMsg},
    text::truncate_to_char_boundary,
};

mod cli;
mod conflict;
mod identifier;

pub use cli::{
    ChangeType, CommandFailure, CommandOutput, CommandRunner, CommandSpec, GitCliError,
    ProcessRunner, StatusDiffEntry, parse_name_status,
};
pub use conflict::{MergeConflict, Resolution, Side};
pub use identifier::{ChangeIdentifier, DEFAULT_WEB_BASE, IdentifierError, RepositoryIdentifier};

// Rendered diffs are shown to humans one file at a time.
const MAX_RENDERED_DIFF_BYTES: usize = 4096;

// Output fragments git prints when an am/cherry-pick stops on conflicts.
const CONFLICT_MARKERS: &[&str] = &["CONFLICT (", "could not apply", "unmerged", "needs merge"];

// Failure text of an abort when there was nothing to abort.
const NOTHING_TO_ABORT: &[&str] = &[
    "no merge to abort",
    "no cherry-pick or revert in progress",
    "operation not in progress",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOp {
    Am,
    CherryPick,
    Merge,
}

impl ConflictOp {
    pub fn subcommand(self) -> &'static str {
        match self {
            ConflictOp::Am => "am",
            ConflictOp::CherryPick => "cherry-pick",
            ConflictOp::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// A git invocation that exited non-zero, tagged with its subcommand.
#[derive(Debug, Clone, Error)]
#[error("git {subcommand} failed with {failure}")]
pub struct GitCommandFailure {
    pub subcommand: String,
    pub failure: CommandFailure,
}

/// A git failure whose output says the operation stopped on conflicts.
#[derive(Debug, Clone, Error)]
#[error("git {operation} stopped with {} conflicted file(s)", self.conflicts.len())]
pub struct ConflictFailure {
    pub operation: ConflictOp,
    pub failure: CommandFailure,
    pub conflicts: Vec<MergeConflict>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Command(#[from] GitCommandFailure),
    #[error(transparent)]
    Conflict(Box<ConflictFailure>),
    #[error(transparent)]
    Cli(GitCliError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no resolution selected for conflicted file {0}")]
    Unresolved(String),
}

impl RepositoryError {
    /// Raw process output behind this error, if it came from a command.
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            RepositoryError::Command(err) => Some(&err.failure),
            RepositoryError::Conflict(err) => Some(&err.failure),
            RepositoryError::Cli(GitCliError::CommandFailed(failure)) => Some(failure),
            _ => None,
        }
    }
}

impl From<ConflictFailure> for RepositoryError {
    fn from(value: ConflictFailure) -> Self {
        RepositoryError::Conflict(Box::new(value))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyPatchOptions {
    pub three_way: bool,
}

/// Factory for working copies kept under one storage root, one directory per
/// repository slug.
#[derive(Clone)]
pub struct RepositoryStore {
    root: PathBuf,
    web_base: String,
    runner: Arc<dyn CommandRunner>,
    status: Option<StatusChannel>,
    diff_tool: Option<String>,
}

impl RepositoryStore {
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            web_base: DEFAULT_WEB_BASE.to_string(),
            runner,
            status: None,
            diff_tool: None,
        }
    }

    pub fn with_web_base(mut self, web_base: impl Into<String>) -> Self {
        self.web_base = web_base.into();
        self
    }

    pub fn with_status(mut self, status: StatusChannel) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_diff_tool(mut self, diff_tool: Option<String>) -> Self {
        self.diff_tool = diff_tool;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &RepositoryIdentifier) -> PathBuf {
        self.root.join(id.slug())
    }

    /// Open the working copy for `id`, cloning it first if the directory is
    /// missing. Always points `default_branch` at `origin/<default_branch>`.
    pub async fn open_or_clone(
        &self,
        id: &RepositoryIdentifier,
        default_branch: &str,
    ) -> Result<LocalRepository, RepositoryError> {
        let repo = LocalRepository {
            path: self.path_for(id),
            id: id.clone(),
            default_branch: default_branch.to_string(),
            web_base: self.web_base.clone(),
            runner: self.runner.clone(),
            status: self.status.clone(),
            diff_tool: self.diff_tool.clone(),
        };

        if !repo.path.exists() {
            tokio::fs::create_dir_all(&self.root).await?;
            tracing::info!(repo = %id, path = %repo.path.display(), "Cloning repository");
            let clone = CommandSpec::git([
                OsStr::new("clone"),
                OsStr::new(&id.url_with_base(&self.web_base)),
                repo.path.as_os_str(),
            ]);
            repo.exec(clone, &self.root).await?;
        } else {
            tracing::debug!(repo = %id, path = %repo.path.display(), "Reusing working copy");
        }

        let upstream = format!("origin/{default_branch}");
        repo.git(["branch", "-u", upstream.as_str(), default_branch])
            .await?;
        Ok(repo)
    }
}

/// One working copy on disk. Operations are strictly sequential: the owner
/// awaits each one before issuing the next.
pub struct LocalRepository {
    path: PathBuf,
    id: RepositoryIdentifier,
    default_branch: String,
    web_base: String,
    runner: Arc<dyn CommandRunner>,
    status: Option<StatusChannel>,
    diff_tool: Option<String>,
}

impl LocalRepository {
    /// Wrap an existing working copy without touching it.
    pub fn new(
        path: impl Into<PathBuf>,
        id: RepositoryIdentifier,
        default_branch: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            path: path.into(),
            id,
            default_branch: default_branch.into(),
            web_base: DEFAULT_WEB_BASE.to_string(),
            runner,
            status: None,
            diff_tool: None,
        }
    }

    pub fn with_web_base(mut self, web_base: impl Into<String>) -> Self {
        self.web_base = web_base.into();
        self
    }

    pub fn attach_status(&mut self, status: StatusChannel) {
        self.status = Some(status);
    }

    pub fn detach_status(&mut self) -> Option<StatusChannel> {
        self.status.take()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &RepositoryIdentifier {
        &self.id
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn status(&self) -> Option<&StatusChannel> {
        self.status.as_ref()
    }

    pub fn publish(&self, msg: StatusMsg) {
        if let Some(status) = &self.status {
            status.publish(msg);
        }
    }

    pub fn remote_url_for(&self, id: &RepositoryIdentifier) -> String {
        id.url_with_base(&self.web_base)
    }

    /// Add `target` as a remote named by its slug (if missing) and fetch it.
    /// Returns the remote name.
    pub async fn track_remote(
        &self,
        target: &RepositoryIdentifier,
    ) -> Result<String, RepositoryError> {
        let remote = target.slug();
        let url = self.remote_url_for(target);
        match self.git(["remote", "add", remote.as_str(), url.as_str()]).await {
            Ok(_) => {}
            Err(RepositoryError::Command(err)) if err.failure.mentions("already exists") => {
                tracing::debug!(remote, "Remote already tracked");
            }
            Err(err) => return Err(err),
        }
        self.git(["fetch", remote.as_str()]).await?;
        Ok(remote)
    }

    /// Force `local_branch` to mirror `<remote>/<remote_branch>`, discarding
    /// local drift.
    pub async fn sync_branch_with_remote(
        &self,
        remote: &str,
        local_branch: &str,
        remote_branch: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let target = format!("{remote}/{}", remote_branch.unwrap_or(local_branch));
        self.git(["fetch", remote]).await?;
        self.git(["checkout", local_branch]).await?;
        self.git(["reset", "--hard", target.as_str()]).await?;
        Ok(())
    }

    /// Create `branch` from HEAD, or switch to it when it already exists.
    pub async fn checkout(&self, branch: &str) -> Result<(), RepositoryError> {
        match self.git(["checkout", "-b", branch]).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::Command(err)) if err.failure.mentions("already exists") => {
                self.git(["checkout", branch]).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Check out `branch` at the tip of its copy on `remote`, discarding any
    /// stale local branch of that name. Returns `false` and falls back to
    /// [`checkout`](Self::checkout) when the remote has no such branch.
    pub async fn checkout_remote_branch(
        &self,
        remote: &str,
        branch: &str,
    ) -> Result<bool, RepositoryError> {
        self.git(["fetch", remote]).await?;
        let tracking = format!("{remote}/{branch}");
        let tracking_ref = format!("refs/remotes/{tracking}");
        let exists = self
            .git(["rev-parse", "--verify", "--quiet", tracking_ref.as_str()])
            .await;
        match exists {
            Ok(_) => {
                self.git(["checkout", "-B", branch, tracking.as_str()]).await?;
                Ok(true)
            }
            Err(RepositoryError::Command(_)) => {
                self.checkout(branch).await?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Full message of the commit at HEAD.
    pub async fn head_message(&self) -> Result<String, RepositoryError> {
        self.git(["log", "-1", "--format=%B"]).await
    }

    pub async fn amend_message(&self, message: &str) -> Result<(), RepositoryError> {
        self.git(["commit", "--amend", "--no-verify", "-m", message])
            .await
            .map(|_| ())
    }

    pub async fn abort_merge(&self) -> Result<(), RepositoryError> {
        self.abort(["merge", "--abort"]).await
    }

    pub async fn abort_patch(&self) -> Result<(), RepositoryError> {
        self.abort(["am", "--abort"]).await
    }

    pub async fn abort_cherry_pick(&self) -> Result<(), RepositoryError> {
        self.abort(["cherry-pick", "--abort"]).await
    }

    /// `git am` a mailbox patch, surfacing conflicts as [`ConflictFailure`].
    pub async fn apply_patch(
        &self,
        patch: &Path,
        options: ApplyPatchOptions,
    ) -> Result<(), RepositoryError> {
        let mut args: Vec<OsString> = vec![
            "am".into(),
            patch.as_os_str().to_os_string(),
            "--keep-non-patch".into(),
        ];
        if options.three_way {
            args.push("--3way".into());
        }
        self.git_detecting_conflicts(ConflictOp::Am, args).await
    }

    pub async fn cherry_pick(&self, commit_sha: &str) -> Result<(), RepositoryError> {
        self.git_detecting_conflicts(ConflictOp::CherryPick, ["cherry-pick", "-x", commit_sha])
            .await
    }

    pub async fn continue_merge(&self, op: ConflictOp) -> Result<(), RepositoryError> {
        self.git_detecting_conflicts(op, [op.subcommand(), "--continue"])
            .await
    }

    /// Every unmerged path with its content and a rendered diff.
    pub async fn conflicts(&self) -> Result<Vec<MergeConflict>, RepositoryError> {
        let out = self
            .git(["diff", "--name-status", "--diff-filter=U"])
            .await?;
        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        for entry in parse_name_status(&out) {
            if !seen.insert(entry.path.clone()) {
                continue;
            }
            let content = match tokio::fs::read(self.path.join(&entry.path)).await {
                Ok(bytes) => String::from_utf8(bytes).ok(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => return Err(err.into()),
            };
            let diff = self.render_diff(&entry.path).await;
            conflicts.push(MergeConflict::new(entry.path, content, diff));
        }
        Ok(conflicts)
    }

    pub async fn add_all(&self) -> Result<(), RepositoryError> {
        self.git(["add", "--all"]).await.map(|_| ())
    }

    pub async fn add_path(&self, path: &str) -> Result<(), RepositoryError> {
        self.git(["add", path]).await.map(|_| ())
    }

    pub async fn checkout_side(&self, side: Side, path: &str) -> Result<(), RepositoryError> {
        self.git(["checkout", side.flag(), path]).await.map(|_| ())
    }

    pub async fn write_worktree_file(&self, path: &str, text: &str) -> Result<(), RepositoryError> {
        let full = self.path.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, text).await?;
        Ok(())
    }

    pub async fn push(&self, remote: &str, branch: &str, force: bool) -> Result<(), RepositoryError> {
        let mut args = vec!["push", remote, branch];
        if force {
            args.push("--force");
        }
        self.git(args).await.map(|_| ())
    }

    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), RepositoryError> {
        self.git(["remote", "set-url", remote, url]).await.map(|_| ())
    }

    pub async fn get_remote_url(&self, remote: &str) -> Result<String, RepositoryError> {
        let out = self.git(["remote", "get-url", remote]).await?;
        Ok(out.trim().to_string())
    }

    /// Committer identity used by `am` and `cherry-pick` in this clone.
    pub async fn configure_identity(&self, name: &str, email: &str) -> Result<(), RepositoryError> {
        self.git(["config", "user.name", name]).await?;
        self.git(["config", "user.email", email]).await?;
        Ok(())
    }

    /// Run `git <args>` in the working copy and return stdout.
    pub async fn git<I, S>(&self, args: I) -> Result<String, RepositoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.exec(CommandSpec::git(args), &self.path).await
    }
}

// Private methods
impl LocalRepository {
    async fn exec(&self, spec: CommandSpec, dir: &Path) -> Result<String, RepositoryError> {
        self.publish(StatusMsg::command(spec.to_string()));
        match self.runner.run(&spec, dir).await {
            Ok(out) => Ok(out.stdout),
            Err(GitCliError::CommandFailed(failure)) => Err(GitCommandFailure {
                subcommand: spec.subcommand(),
                failure,
            }
            .into()),
            Err(err) => Err(RepositoryError::Cli(err)),
        }
    }

    async fn abort(&self, args: [&str; 2]) -> Result<(), RepositoryError> {
        match self.git(args).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::Command(err))
                if NOTHING_TO_ABORT.iter().any(|m| err.failure.mentions(m)) =>
            {
                tracing::trace!(subcommand = %err.subcommand, "Nothing to abort");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn git_detecting_conflicts<I, S>(
        &self,
        op: ConflictOp,
        args: I,
    ) -> Result<(), RepositoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        match self.git(args).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::Command(err)) if looks_like_conflict(&err.failure) => {
                let conflicts = self.conflicts().await?;
                tracing::info!(
                    repo = %self.id,
                    operation = %op,
                    conflicts = conflicts.len(),
                    "Operation stopped on conflicts"
                );
                Err(ConflictFailure {
                    operation: op,
                    failure: err.failure,
                    conflicts,
                }
                .into())
            }
            Err(err) => Err(err),
        }
    }

    async fn render_diff(&self, path: &str) -> String {
        let spec = match &self.diff_tool {
            Some(tool) => CommandSpec::git(["diff", "--ext-diff", "--", path])
                .env("GIT_EXTERNAL_DIFF", tool),
            None => CommandSpec::git(["diff", "--", path]),
        };
        match self.exec(spec, &self.path).await {
            Ok(out) => {
                let plain = strip_ansi_escapes::strip_str(&out);
                truncate_to_char_boundary(&plain, MAX_RENDERED_DIFF_BYTES).to_string()
            }
            Err(err) => {
                tracing::warn!(path, error = %err, "Failed to render conflict diff");
                String::new()
            }
        }
    }
}

fn looks_like_conflict(failure: &CommandFailure) -> bool {
    CONFLICT_MARKERS
        .iter()
        .any(|m| failure.stdout.contains(m) || failure.stderr.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_markers_are_recognised() {
        let am = CommandFailure::new(
            "Applying: tweak\nCONFLICT (content): Merge conflict in a.txt\n",
            "error: Failed to merge in the changes.\n",
            128,
        );
        assert!(looks_like_conflict(&am));

        let pick = CommandFailure::new("", "error: could not apply 1a2b3c... tweak\n", 1);
        assert!(looks_like_conflict(&pick));

        let network = CommandFailure::new("", "fatal: unable to access 'https://...'\n", 128);
        assert!(!looks_like_conflict(&network));
    }

    #[test]
    fn errors_expose_their_process_output() {
        let err: RepositoryError = GitCommandFailure {
            subcommand: "push".into(),
            failure: CommandFailure::new("", "rejected", 1),
        }
        .into();
        assert_eq!(err.command_failure().unwrap().stderr, "rejected");
        assert!(err.to_string().starts_with("git push failed"));
        assert!(RepositoryError::Unresolved("a".into()).command_failure().is_none());
    }

    #[test]
    fn conflict_op_maps_to_subcommand() {
        assert_eq!(ConflictOp::Am.subcommand(), "am");
        assert_eq!(ConflictOp::CherryPick.to_string(), "cherry-pick");
    }
}
