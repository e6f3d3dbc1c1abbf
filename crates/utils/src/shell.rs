//! Executable lookup helpers

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// Explicit paths (absolute, or containing a separator) are returned as-is when
/// they point at a file; bare names are looked up on the current PATH.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let resolved = which(executable).await;
    if resolved.is_none() {
        tracing::debug!(executable, "Executable not found on PATH");
    }
    resolved
}

async fn which(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(|result| result.ok())
}

#[cfg(test)]
mod tests {
    use super::resolve_executable_path;

    #[tokio::test]
    async fn empty_name_resolves_to_nothing() {
        assert!(resolve_executable_path("   ").await.is_none());
    }

    #[tokio::test]
    async fn missing_explicit_path_resolves_to_nothing() {
        assert!(
            resolve_executable_path("/definitely/not/here/git")
                .await
                .is_none()
        );
    }
}
