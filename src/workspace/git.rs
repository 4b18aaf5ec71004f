use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature,
};

use crate::error::{AppError, Result};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    Ok(())
}

/// Build `FetchOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_fetch_options(token: &str) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Build `PushOptions` that authenticate via credential callback.
fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Clone a repository into the target directory.
///
/// The remote URL stored in `.git/config` will be the **plain** URL
/// (no credentials). Authentication is handled via credential callback only.
pub async fn clone(url: &str, target: &Path, token: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(AppError::Git(format!(
            "Expected HTTPS clone URL, got: {url}"
        )));
    }

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let fetch_opts = make_fetch_options(&token);
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Clone task panicked: {e}")))?
}

/// The remote's default branch, read from `origin/HEAD` after a clone.
pub async fn default_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.find_reference("refs/remotes/origin/HEAD")?;
        let target = head
            .symbolic_target()
            .unwrap_or("refs/remotes/origin/main");
        Ok(target
            .strip_prefix("refs/remotes/origin/")
            .unwrap_or("main")
            .to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Default-branch task panicked: {e}")))?
}

/// Create and checkout a new branch at HEAD. If the branch already exists it
/// is checked out as-is.
pub async fn create_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        if repo
            .find_branch(&branch_name, git2::BranchType::Local)
            .is_err()
        {
            let head = repo.head()?;
            let commit = head.peel_to_commit()?;
            repo.branch(&branch_name, &commit, false)?;
        }
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Create-branch task panicked: {e}")))?
}

/// Discard all uncommitted changes and untracked files, restoring the
/// checked-out branch to its last commit. Makes re-applying a regenerated
/// fix start from a clean tree.
pub async fn discard_changes(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Discard-changes task panicked: {e}")))?
}

/// Stage all changes.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit staged changes with the given author identity.
pub async fn commit(dir: &Path, message: &str, name: &str, email: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    let name = name.to_string();
    let email = email.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = Signature::now(&name, &email)?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let head = repo.head()?;
        let parent = head.peel_to_commit()?;
        repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Push the current branch to origin.
pub async fn push(dir: &Path, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

/// Check if there are any staged or unstaged changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/my-branch").is_ok());
        assert!(validate_branch_name("graft/issue-42").is_ok());
    }

    #[test]
    fn test_has_changes_empty_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        // Brand new repo with no files — no changes
        let statuses = repo.statuses(None).unwrap();
        assert!(statuses.is_empty());
    }

    #[test]
    fn test_has_changes_with_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let _repo = Repository::init(tmp.path()).unwrap();

        // Create an untracked file
        fs::write(tmp.path().join("hello.txt"), "world").unwrap();

        let repo = Repository::open(tmp.path()).unwrap();
        let statuses = repo.statuses(None).unwrap();
        assert!(!statuses.is_empty());
    }

    #[test]
    fn test_clone_rejects_non_https() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = rt.block_on(clone(
            "git@github.com:owner/repo.git",
            Path::new("/tmp/test"),
            "token",
        ));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Expected HTTPS clone URL"));
    }
}
