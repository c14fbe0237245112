use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::build::RepoBuilder;
use git2::{Commit, Oid, Repository, ResetType};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("clone failed: {0}")]
    Clone(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Internal(String),
}

fn internal(e: git2::Error) -> GitError {
    GitError::Internal(e.message().to_string())
}

/// Everything needed to materialize one catalog checkout: where to clone
/// from, which revision to sync, and the local workspace directory.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub url: String,
    pub revision: String,
    pub path: PathBuf,
}

/// Git-fetch capability consumed by the syncer. The workspace directory
/// is single-writer by construction: the syncer runs one job at a time.
pub trait GitClient: Send + Sync {
    fn fetch(&self, spec: &FetchSpec) -> Result<Repo, GitError>;
}

/// A local checkout pinned at a head commit.
pub struct Repo {
    path: PathBuf,
    head: String,
}

impl Repo {
    #[must_use]
    pub fn new(path: PathBuf, head: String) -> Self {
        Self { path, head }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn head(&self) -> &str {
        &self.head
    }

    /// Timestamp of the last commit touching `rel`. Falls back to the
    /// filesystem mtime when the checkout has no usable history for the
    /// path (fresh fixtures in tests, shallow clones).
    pub fn modified_time(&self, rel: &Path) -> Result<DateTime<Utc>, GitError> {
        if let Ok(repo) = Repository::open(&self.path) {
            if let Some(time) = last_commit_time(&repo, rel) {
                return Ok(time);
            }
        }

        let metadata = std::fs::metadata(self.path.join(rel))?;
        let mtime = metadata.modified()?;
        Ok(DateTime::<Utc>::from(mtime))
    }
}

fn path_oid(commit: &Commit<'_>, rel: &Path) -> Option<Oid> {
    commit.tree().ok()?.get_path(rel).ok().map(|entry| entry.id())
}

fn last_commit_time(repo: &Repository, rel: &Path) -> Option<DateTime<Utc>> {
    let mut walk = repo.revwalk().ok()?;
    walk.push_head().ok()?;
    walk.set_sorting(git2::Sort::TIME).ok()?;

    for oid in walk.flatten() {
        let commit = repo.find_commit(oid).ok()?;
        let Some(current) = path_oid(&commit, rel) else {
            continue;
        };

        let changed = if commit.parent_count() == 0 {
            true
        } else {
            commit.parents().all(|p| path_oid(&p, rel) != Some(current))
        };

        if changed {
            let time = commit.time();
            return Utc.timestamp_opt(time.seconds(), 0).single();
        }
    }

    None
}

/// libgit2-backed client: clone on first use, fetch + hard-reset on
/// every subsequent sync so the checkout always matches the remote.
pub struct Git2Client;

impl GitClient for Git2Client {
    fn fetch(&self, spec: &FetchSpec) -> Result<Repo, GitError> {
        let repo = if spec.path.join(".git").exists() {
            let repo = Repository::open(&spec.path).map_err(internal)?;

            debug!(url = %spec.url, path = %spec.path.display(), "fetching origin");
            let mut remote = repo.find_remote("origin").map_err(internal)?;
            remote
                .fetch(&[] as &[&str], None, None)
                .map_err(|e| GitError::Fetch(e.message().to_string()))?;
            drop(remote);

            repo
        } else {
            if let Some(parent) = spec.path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            debug!(url = %spec.url, path = %spec.path.display(), "cloning");
            RepoBuilder::new()
                .clone(&spec.url, &spec.path)
                .map_err(|e| GitError::Clone(e.message().to_string()))?
        };

        let oid = resolve_revision(&repo, &spec.revision)?;
        let object = repo.find_object(oid, None).map_err(internal)?;
        repo.reset(&object, ResetType::Hard, None).map_err(internal)?;

        Ok(Repo::new(spec.path.clone(), oid.to_string()))
    }
}

fn resolve_revision(repo: &Repository, revision: &str) -> Result<Oid, GitError> {
    let candidates = [
        format!("refs/remotes/origin/{revision}"),
        format!("refs/tags/{revision}"),
        revision.to_string(),
    ];

    for candidate in &candidates {
        if let Ok(object) = repo.revparse_single(candidate) {
            if let Ok(commit) = object.peel_to_commit() {
                return Ok(commit.id());
            }
        }
    }

    Err(GitError::RevisionNotFound(revision.to_string()))
}

/// Web-browsable URL for a file pinned at a commit. Handles the common
/// GitHub/GitLab remote shapes; anything else gets a git:// fallback.
#[must_use]
pub fn manifest_url(repo_url: &str, sha: &str, rel_path: &str) -> String {
    if let Some(rest) = repo_url.strip_prefix("git@github.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://github.com/{repo}/blob/{sha}/{rel_path}");
    }

    if let Some(rest) = repo_url.strip_prefix("git@gitlab.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://gitlab.com/{repo}/-/blob/{sha}/{rel_path}");
    }

    if repo_url.starts_with("http://") || repo_url.starts_with("https://") {
        let base = repo_url.trim_end_matches('/').trim_end_matches(".git");
        return format!("{base}/blob/{sha}/{rel_path}");
    }

    format!("git://{repo_url}/{rel_path}")
}
