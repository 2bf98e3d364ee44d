//! Git operations for the verification and auto-fix workflow
//!
//! Provides branch, stage, commit, diff-measurement, and rollback
//! operations via libgit2. Push shells out to `git` so the user's
//! credential helpers keep working.

use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, Signature, StatusOptions};
use std::path::Path;
use std::process::Command;

/// Status of the working directory
#[derive(Debug, Clone, Default)]
pub struct GitStatus {
    pub branch: String,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

/// Get the current git status
pub fn current_status(repo_path: &Path) -> Result<GitStatus> {
    let repo = Repository::open(repo_path)?;

    let head = repo.head().context("Failed to get HEAD")?;
    let branch = head.shorthand().unwrap_or("detached").to_string();

    let mut status = GitStatus {
        branch,
        ..Default::default()
    };

    let mut opts = StatusOptions::new();
    opts.include_untracked(true);
    let statuses = repo.statuses(Some(&mut opts))?;

    for entry in statuses.iter() {
        let path = entry.path().unwrap_or("").to_string();
        let s = entry.status();

        if s.is_index_new() || s.is_index_modified() || s.is_index_deleted() {
            status.staged.push(path.clone());
        }
        if s.is_wt_modified() || s.is_wt_deleted() {
            status.modified.push(path.clone());
        }
        if s.is_wt_new() {
            status.untracked.push(path);
        }
    }

    Ok(status)
}

/// Whether the working tree has no staged, modified, or untracked entries.
///
/// Mutating steps must verify this immediately before running, failing
/// fast rather than interleaving with another invocation's changes.
pub fn is_clean(repo_path: &Path) -> Result<bool> {
    let status = current_status(repo_path)?;
    Ok(status.staged.is_empty() && status.modified.is_empty() && status.untracked.is_empty())
}

/// Name of the currently checked-out branch.
pub fn current_branch(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let head = repo.head().context("Failed to get HEAD")?;
    Ok(head.shorthand().unwrap_or("detached").to_string())
}

/// HEAD commit SHA of the repository.
pub fn head_sha(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let head = repo.head()?;
    let commit = head.peel_to_commit()?;
    Ok(commit.id().to_string())
}

/// Create a new branch from current HEAD
pub fn create_branch(repo_path: &Path, name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let head = repo.head()?;
    let commit = head.peel_to_commit()?;

    repo.branch(name, &commit, false)
        .context(format!("Failed to create branch '{}'", name))?;

    Ok(())
}

/// Checkout an existing branch
pub fn checkout_branch(repo_path: &Path, name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    let (object, reference) = repo
        .revparse_ext(name)
        .context(format!("Branch '{}' not found", name))?;

    repo.checkout_tree(&object, None)?;

    match reference {
        Some(r) => repo.set_head(r.name().unwrap_or("HEAD"))?,
        None => repo.set_head_detached(object.id())?,
    }

    Ok(())
}

/// Create branch and checkout in one step
pub fn create_and_checkout_branch(repo_path: &Path, name: &str) -> Result<()> {
    create_branch(repo_path, name)?;
    checkout_branch(repo_path, name)?;
    Ok(())
}

/// Generate a branch name for an automated fix.
pub fn generate_fix_branch_name(check_name: &str, error_label: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let short_id = &id[..8];

    // Slugify: lowercase, alphanumerics only, dash-separated, bounded
    let slug: String = format!("{} {}", check_name, error_label)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");

    let slug = if slug.len() > 40 {
        slug[..40].trim_end_matches('-').to_string()
    } else {
        slug
    };

    format!("autofix/{}-{}", short_id, slug)
}

/// Stage all modified and untracked files
pub fn stage_all(repo_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;

    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;

    Ok(())
}

/// Commit staged changes
pub fn commit(repo_path: &Path, message: &str) -> Result<String> {
    let repo = Repository::open(repo_path)?;
    let mut index = repo.index()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let head = repo.head()?;
    let parent = head.peel_to_commit()?;

    // Author info from git config, with a neutral fallback
    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| "branchpilot".to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| "branchpilot@local".to_string());

    let sig = Signature::now(&name, &email)?;

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;

    Ok(oid.to_string())
}

/// Total changed lines (insertions + deletions) in the working tree
/// relative to HEAD, untracked files included.
pub fn changed_line_count(repo_path: &Path) -> Result<usize> {
    let repo = Repository::open(repo_path)?;
    let head_tree = repo.head()?.peel_to_tree()?;

    let mut opts = git2::DiffOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true).show_untracked_content(true);

    let diff = repo.diff_tree_to_workdir_with_index(Some(&head_tree), Some(&mut opts))?;
    let stats = diff.stats()?;
    Ok(stats.insertions() + stats.deletions())
}

/// Discard every working-tree change, staged and unstaged, tracked and
/// untracked, restoring the tree to HEAD byte-for-byte.
pub fn discard_all_changes(repo_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;

    // Reset the index to HEAD first so checkout sees a consistent baseline
    let head = repo.head()?.peel_to_commit()?;
    repo.reset(head.as_object(), git2::ResetType::Mixed, None)?;

    let mut builder = git2::build::CheckoutBuilder::new();
    builder.force().remove_untracked(true);
    repo.checkout_head(Some(&mut builder))
        .context("Failed to restore working tree")?;

    Ok(())
}

/// Delete a local branch.
pub fn delete_branch(repo_path: &Path, name: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let mut branch = repo
        .find_branch(name, git2::BranchType::Local)
        .context(format!("Branch '{}' not found", name))?;
    branch.delete()?;
    Ok(())
}

/// Push a branch to origin (shells out to git for credential helpers)
pub fn push_branch(repo_path: &Path, branch: &str) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(["push", "-u", "origin", branch])
        .output()
        .context("Failed to execute git push")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(anyhow::anyhow!(
            "git push failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Init a repo with one committed file.
    fn init_repo(dir: &TempDir) -> Repository {
        let repo = Repository::init(dir.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        fs::write(dir.path().join("app.py"), "print('hello')\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = Signature::now("test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[test]
    fn test_clean_after_init_commit() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);
        assert!(is_clean(dir.path()).unwrap());
        assert_eq!(changed_line_count(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_changed_line_count_tracks_edits_and_new_files() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);

        fs::write(dir.path().join("app.py"), "print('changed')\n").unwrap();
        fs::write(dir.path().join("new.py"), "a = 1\nb = 2\n").unwrap();

        // One line replaced (1 insertion + 1 deletion) plus two new lines
        assert_eq!(changed_line_count(dir.path()).unwrap(), 4);
        assert!(!is_clean(dir.path()).unwrap());
    }

    #[test]
    fn test_discard_restores_tree_exactly() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);

        fs::write(dir.path().join("app.py"), "tampered\n").unwrap();
        fs::write(dir.path().join("junk.py"), "junk\n").unwrap();

        discard_all_changes(dir.path()).unwrap();

        assert!(is_clean(dir.path()).unwrap());
        assert_eq!(
            fs::read_to_string(dir.path().join("app.py")).unwrap(),
            "print('hello')\n"
        );
        assert!(!dir.path().join("junk.py").exists());
    }

    #[test]
    fn test_branch_create_checkout_delete() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);

        create_and_checkout_branch(dir.path(), "feature/x").unwrap();
        assert_eq!(current_branch(dir.path()).unwrap(), "feature/x");

        checkout_branch(dir.path(), "master").ok();
        checkout_branch(dir.path(), "main").ok();
        // Whichever default branch exists, we are no longer on feature/x
        assert_ne!(current_branch(dir.path()).unwrap(), "feature/x");

        delete_branch(dir.path(), "feature/x").unwrap();
    }

    #[test]
    fn test_commit_stages_and_advances_head() {
        let dir = TempDir::new().unwrap();
        init_repo(&dir);
        let before = head_sha(dir.path()).unwrap();

        fs::write(dir.path().join("app.py"), "print('v2')\n").unwrap();
        stage_all(dir.path()).unwrap();
        let sha = commit(dir.path(), "update greeting").unwrap();

        assert_ne!(before, sha);
        assert_eq!(head_sha(dir.path()).unwrap(), sha);
        assert!(is_clean(dir.path()).unwrap());
    }

    #[test]
    fn test_fix_branch_name_shape() {
        let name = generate_fix_branch_name("lint", "formatting drift!");
        assert!(name.starts_with("autofix/"));
        assert!(!name.contains('!'));
        assert!(!name.contains(' '));
        // unique per call
        assert_ne!(name, generate_fix_branch_name("lint", "formatting drift!"));
    }
}
