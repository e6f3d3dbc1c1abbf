use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dialoguer::{Confirm, Editor, Select, theme::ColorfulTheme};
use git::{MergeConflict, Resolution};
use services::services::conflicts::{ConflictPresenter, RoundError, RoundHandle};
use tracing::warn;

use crate::error::CliError;

const CHOICES: &[&str] = &["Ours", "Theirs", "Edit", "Fix it later", "Cancel"];

static PROMPT_ABANDONED: AtomicBool = AtomicBool::new(false);

/// Whether a prompt was left blocking on stdin after its round ended, e.g.
/// on a round timeout. The runtime cannot shut down while it blocks.
pub fn prompt_abandoned() -> bool {
    PROMPT_ABANDONED.load(Ordering::SeqCst)
}

/// Flags the prompt as abandoned when dropped before it finished.
struct PendingPrompt {
    finished: bool,
}

impl PendingPrompt {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for PendingPrompt {
    fn drop(&mut self) {
        if !self.finished {
            PROMPT_ABANDONED.store(true, Ordering::SeqCst);
        }
    }
}

/// Walks the operator through each conflicted file on the terminal.
pub struct TerminalPresenter;

#[async_trait]
impl ConflictPresenter for TerminalPresenter {
    async fn present(&self, round: RoundHandle) {
        // dialoguer blocks on stdin.
        let pending = PendingPrompt { finished: false };
        let prompted = tokio::task::spawn_blocking(move || prompt_round(&round)).await;
        pending.finish();
        match prompted {
            Ok(Ok(())) => {}
            Ok(Err(CliError::Round(RoundError::Closed))) => {
                eprintln!("The conflict round was closed before a decision was made.");
            }
            Ok(Err(e)) => warn!(error = %e, "Conflict prompt failed, cancelling the round"),
            Err(e) => warn!(error = %e, "Conflict prompt panicked"),
        }
    }
}

fn prompt_round(round: &RoundHandle) -> Result<(), CliError> {
    let conflicts = round.conflicts();
    println!();
    println!(
        "Round {}: git {} stopped on {} conflicted file(s)",
        round.round(),
        round.operation().subcommand(),
        conflicts.len()
    );

    loop {
        for (index, conflict) in round.conflicts().iter().enumerate() {
            if conflict.is_decided() {
                continue;
            }
            match prompt_conflict(round, conflict)? {
                Some(resolution) => round.decide(index, resolution)?,
                None => {
                    round.cancel()?;
                    println!("Cancelled; the working copy is left as it is.");
                    return Ok(());
                }
            }
        }

        if !round.can_continue() {
            continue;
        }
        let apply = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Apply these resolutions and continue?")
            .default(true)
            .interact()?;
        if apply {
            round.submit()?;
            return Ok(());
        }
        for index in 0..conflicts.len() {
            round.decide(index, Resolution::Unselected)?;
        }
    }
}

/// `None` means the operator asked to cancel the whole round.
fn prompt_conflict(
    round: &RoundHandle,
    conflict: &MergeConflict,
) -> Result<Option<Resolution>, CliError> {
    let progress = round.progress();
    loop {
        println!();
        if !conflict.diff().is_empty() {
            println!("{}", conflict.diff());
        }
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "[{}/{}] {}",
                progress.resolved + 1,
                progress.total,
                conflict.path()
            ))
            .items(CHOICES)
            .default(0)
            .interact()?;

        let resolution = match choice {
            0 => Resolution::Ours,
            1 => Resolution::Theirs,
            2 => {
                let current = conflict.content().unwrap_or_default();
                match Editor::new().extension(&extension_of(conflict.path())).edit(current)? {
                    Some(text) => Resolution::Manual(text),
                    None => {
                        println!("Edit aborted, choose again.");
                        continue;
                    }
                }
            }
            3 => Resolution::Deferred,
            _ => return Ok(None),
        };
        return Ok(Some(resolution));
    }
}

fn extension_of(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => format!(".{ext}"),
        _ => ".txt".to_string(),
    }
}
