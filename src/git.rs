//! Staged diff collection using git2.

use git2::{DiffFormat, ErrorCode, Repository, Tree};
use tracing::debug;

use crate::error::GitError;

/// Staged changes handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPayload {
    pub text: String,
    pub files_changed: usize,
    pub additions: usize,
    pub deletions: usize,
    /// True when `text` was cut to fit the size limit.
    pub truncated: bool,
}

impl DiffPayload {
    /// Derive statistics from unified diff text (e.g. piped in by LazyGit),
    /// truncating the text to `max_bytes` at a char boundary.
    pub fn from_text(text: &str, max_bytes: usize) -> Self {
        let mut files_changed = 0;
        let mut additions = 0;
        let mut deletions = 0;

        for line in text.lines() {
            if line.starts_with("diff --git ") {
                files_changed += 1;
            } else if line.starts_with("+++") || line.starts_with("---") {
                continue;
            } else if line.starts_with('+') {
                additions += 1;
            } else if line.starts_with('-') {
                deletions += 1;
            }
        }

        // Bare hunks without a `diff --git` header still describe one file.
        if files_changed == 0 && (additions > 0 || deletions > 0) {
            files_changed = 1;
        }

        let (text, truncated) = truncate_at_char_boundary(text, max_bytes);
        Self {
            text,
            files_changed,
            additions,
            deletions,
            truncated,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

/// Resolve the HEAD tree, treating an unborn branch as "no tree".
fn resolve_head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, GitError> {
    let head_ref = match repo.head() {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(GitError::DiffFailed(e)),
    };

    let tree = head_ref.peel_to_tree().map_err(GitError::DiffFailed)?;
    Ok(Some(tree))
}

/// Open the repository containing the current directory.
pub fn open_repository() -> Result<Repository, GitError> {
    Repository::discover(".").map_err(GitError::OpenRepository)
}

/// Collect the staged diff (HEAD tree against the index).
///
/// Returns [`GitError::NoStagedChanges`] when nothing is staged.
pub fn read_staged_diff(repo: &Repository, max_bytes: usize) -> Result<DiffPayload, GitError> {
    let head_tree = resolve_head_tree(repo)?;
    let diff = repo
        .diff_tree_to_index(head_tree.as_ref(), None, None)
        .map_err(GitError::DiffFailed)?;

    let files_changed = diff.deltas().len();
    if files_changed == 0 {
        return Err(GitError::NoStagedChanges);
    }

    let mut text = String::new();
    let mut additions = 0usize;
    let mut deletions = 0usize;
    let mut truncated = false;

    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = line.origin();
        match origin {
            '+' => additions += 1,
            '-' => deletions += 1,
            _ => {}
        }

        if truncated {
            return true;
        }

        let content = String::from_utf8_lossy(line.content());
        if text.len() + content.len() + 1 > max_bytes {
            truncated = true;
            return true;
        }

        if matches!(origin, '+' | '-' | ' ') {
            text.push(origin);
        }
        text.push_str(&content);
        true
    })
    .map_err(GitError::DiffFailed)?;

    debug!(
        files_changed,
        additions,
        deletions,
        bytes = text.len(),
        truncated,
        "Collected staged diff"
    );

    Ok(DiffPayload {
        text,
        files_changed,
        additions,
        deletions,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn init_repo_with_commit() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        {
            let sig = git2::Signature::now("Test", "test@test.com").unwrap();
            let tree_id = repo.index().unwrap().write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        }
        (dir, repo)
    }

    fn stage(repo: &Repository, name: &str, contents: &str) {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    #[test]
    fn test_from_text_counts_lines() {
        let text = "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1,2 @@\n-old\n+new\n+more\n";
        let payload = DiffPayload::from_text(text, 10_000);
        assert_eq!(payload.files_changed, 1);
        assert_eq!(payload.additions, 2);
        assert_eq!(payload.deletions, 1);
        assert!(!payload.truncated);
        assert_eq!(payload.byte_len(), text.len());
    }

    #[test]
    fn test_from_text_bare_hunk() {
        let payload = DiffPayload::from_text("+line added", 10_000);
        assert_eq!(payload.files_changed, 1);
        assert_eq!(payload.additions, 1);
    }

    #[test]
    fn test_from_text_truncates_on_char_boundary() {
        let payload = DiffPayload::from_text("+日本語", 5);
        assert!(payload.truncated);
        assert_eq!(payload.text, "+日");
    }

    #[test]
    fn test_clean_repo_has_no_staged_changes() {
        let (_dir, repo) = init_repo_with_commit();
        assert!(matches!(
            read_staged_diff(&repo, 10_000),
            Err(GitError::NoStagedChanges)
        ));
    }

    #[test]
    fn test_unstaged_changes_are_ignored() {
        let (dir, repo) = init_repo_with_commit();
        std::fs::write(dir.path().join("untracked.txt"), "hello\n").unwrap();
        assert!(matches!(
            read_staged_diff(&repo, 10_000),
            Err(GitError::NoStagedChanges)
        ));
    }

    #[test]
    fn test_staged_file_is_collected() {
        let (_dir, repo) = init_repo_with_commit();
        stage(&repo, "new.txt", "hello\nworld\n");

        let payload = read_staged_diff(&repo, 10_000).unwrap();
        assert_eq!(payload.files_changed, 1);
        assert_eq!(payload.additions, 2);
        assert!(payload.text.contains("+hello"));
        assert!(!payload.truncated);
    }

    #[test]
    fn test_staged_diff_in_unborn_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        stage(&repo, "first.txt", "content\n");

        let payload = read_staged_diff(&repo, 10_000).unwrap();
        assert_eq!(payload.files_changed, 1);
    }

    #[test]
    fn test_staged_diff_truncates_but_counts_everything() {
        let (_dir, repo) = init_repo_with_commit();
        let contents: String = (0..200).map(|i| format!("line {i}\n")).collect();
        stage(&repo, "big.txt", &contents);

        let payload = read_staged_diff(&repo, 256).unwrap();
        assert!(payload.truncated);
        assert!(payload.byte_len() <= 256);
        assert_eq!(payload.additions, 200);
    }

    #[test]
    fn test_unreadable_staged_blob_is_an_error() {
        let (_dir, repo) = init_repo_with_commit();
        let mut index = repo.index().unwrap();
        index
            .add(&git2::IndexEntry {
                ctime: git2::IndexTime::new(0, 0),
                mtime: git2::IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: 6,
                id: git2::Oid::from_str("0123456789abcdef0123456789abcdef01234567").unwrap(),
                flags: 0,
                flags_extended: 0,
                path: b"ghost.txt".to_vec(),
            })
            .unwrap();
        index.write().unwrap();

        assert!(matches!(
            read_staged_diff(&repo, 10_000),
            Err(GitError::DiffFailed(_))
        ));
    }
}
