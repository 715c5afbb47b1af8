//! Read-only interrogation of the local git worktree.
//!
//! The guard step only observes dirtiness and records the operator's chosen
//! strategy; the strategies themselves are contracts consumed by later
//! steps, never mutations performed here.

use std::path::Path;

use rb_core::EngineError;
use rb_process::{CommandRequest, StreamMode};

/// Whether the worktree has uncommitted changes (staged, unstaged, or
/// untracked).
pub async fn is_dirty(repo_root: &Path) -> Result<bool, EngineError> {
    let mut request = CommandRequest::new("git status --porcelain", repo_root);
    request.env = std::env::vars().collect();
    request.stream_mode = StreamMode::BufferOnly;
    let outcome = rb_process::run(&request).await;
    if !outcome.success {
        return Err(EngineError::Config(format!(
            "git status failed in '{}': {}",
            repo_root.display(),
            outcome.stderr.trim()
        )));
    }
    Ok(!outcome.stdout.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git(repo: &Path, args: &str) {
        let mut request = CommandRequest::new(format!("git {args}"), repo);
        request.env = std::env::vars().collect();
        request.shell = true;
        request.stream_mode = StreamMode::BufferOnly;
        let outcome = rb_process::run(&request).await;
        assert!(outcome.success, "git {args} failed: {}", outcome.stderr);
    }

    async fn init_repo(repo: &Path) {
        git(repo, "init -q").await;
        git(repo, "config user.email dev@example.com").await;
        git(repo, "config user.name Dev").await;
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        git(repo, "add .").await;
        git(repo, "commit -q -m init").await;
    }

    #[tokio::test]
    async fn test_clean_tree() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path()).await;
        assert!(!is_dirty(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_untracked_file_is_dirty() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path()).await;
        std::fs::write(tmp.path().join("new.txt"), "x").unwrap();
        assert!(is_dirty(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_modified_file_is_dirty() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path()).await;
        std::fs::write(tmp.path().join("README.md"), "changed\n").unwrap();
        assert!(is_dirty(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_repo_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(is_dirty(tmp.path()).await.is_err());
    }
}
