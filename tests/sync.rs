use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use hubsync::git::{FetchSpec, GitClient, GitError, Repo};
use hubsync::store::{SqliteStore, Store};
use hubsync::sync::Syncer;
use hubsync::types::{Catalog, JobStatus, ResourceKind};

/// Serves a fixture directory as the checkout, with a settable head sha
/// and failure switch.
struct FakeGit {
    dir: PathBuf,
    head: Mutex<String>,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeGit {
    fn new(dir: PathBuf, head: &str) -> Arc<Self> {
        Arc::new(Self {
            dir,
            head: Mutex::new(head.to_string()),
            fail: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        })
    }

    fn set_head(&self, head: &str) {
        *self.head.lock().unwrap() = head.to_string();
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl GitClient for FakeGit {
    fn fetch(&self, _spec: &FetchSpec) -> Result<Repo, GitError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(GitError::Fetch("remote unreachable".to_string()));
        }

        Ok(Repo::new(self.dir.clone(), self.head.lock().unwrap().clone()))
    }
}

fn manifest(kind: &str, name: &str, version: &str) -> String {
    format!(
        r#"apiVersion: tekton.dev/v1
kind: {kind}
metadata:
  name: {name}
  labels:
    app.kubernetes.io/version: "{version}"
  annotations:
    tekton.dev/displayName: "{name}"
    tekton.dev/pipelines.minVersion: "0.50.0"
    tekton.dev/tags: "test"
spec:
  description: A {kind} named {name}.
"#
    )
}

fn write_manifest(root: &Path, kind_dir: &str, name: &str, version: &str, body: &str) {
    let dir = root.join(kind_dir).join(name).join(version);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{name}.yaml")), body).unwrap();
}

fn test_store(temp: &TempDir) -> Arc<SqliteStore> {
    let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
    store.initialize().unwrap();
    Arc::new(store)
}

fn register_catalog(store: &SqliteStore, sha: Option<&str>) -> Catalog {
    let now = Utc::now();
    let catalog = Catalog {
        id: Uuid::new_v4().to_string(),
        name: "tekton".to_string(),
        org: "tektoncd".to_string(),
        url: "https://github.com/tektoncd/catalog".to_string(),
        revision: "main".to_string(),
        context_dir: None,
        sha: sha.map(str::to_string),
        created_at: now,
        updated_at: now,
    };
    store.create_catalog(&catalog).unwrap();
    catalog
}

fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn test_process_syncs_catalog() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "buildah", "0.1", &manifest("Task", "buildah", "0.1"));
    write_manifest(fixture.path(), "task", "buildah", "0.2", &manifest("Task", "buildah", "0.2"));

    let store = test_store(&db);
    // Last sync saw sha-a; the remote has since moved to sha-b.
    let catalog = register_catalog(&store, Some("sha-a"));
    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-b");

    let syncer = Syncer::new(store.clone(), git.clone(), db.path().join("clones"));
    let job = syncer.enqueue(Some("user-1"), &catalog.id).unwrap();
    syncer.process().unwrap();

    let catalog = store.get_catalog(&catalog.id).unwrap().unwrap();
    assert_eq!(catalog.sha.as_deref(), Some("sha-b"));

    let resource = store
        .get_resource(&catalog.id, "buildah", ResourceKind::Task)
        .unwrap()
        .unwrap();
    let versions = store.list_resource_versions(&resource.id).unwrap();
    assert_eq!(versions.len(), 2);

    assert!(store.list_catalog_errors(&catalog.id).unwrap().is_empty());

    let job = store.get_sync_job(&job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
}

#[test]
fn test_process_short_circuits_unchanged_head() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "buildah", "0.1", &manifest("Task", "buildah", "0.1"));

    let store = test_store(&db);
    let catalog = register_catalog(&store, None);
    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-a");

    let syncer = Syncer::new(store.clone(), git.clone(), db.path().join("clones"));
    syncer.enqueue(None, &catalog.id).unwrap();
    syncer.process().unwrap();
    assert_eq!(git.fetches(), 1);

    // Gut the fixture: if the second cycle re-parsed, it would record a
    // "no resources" error. The sha short-circuit must skip the parse.
    std::fs::remove_dir_all(fixture.path().join("task")).unwrap();

    let job = syncer.enqueue(None, &catalog.id).unwrap();
    syncer.process().unwrap();
    assert_eq!(git.fetches(), 2);

    let job = store.get_sync_job(&job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);

    assert!(store.list_catalog_errors(&catalog.id).unwrap().is_empty());
    assert_eq!(store.list_resources(&catalog.id).unwrap().len(), 1);
}

#[test]
fn test_git_failure_marks_job_error() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();

    let store = test_store(&db);
    let catalog = register_catalog(&store, Some("sha-a"));
    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-b");
    git.set_fail(true);

    let syncer = Syncer::new(store.clone(), git.clone(), db.path().join("clones"));
    let job = syncer.enqueue(None, &catalog.id).unwrap();

    // A fetch failure is terminal for the attempt but not a cycle error.
    syncer.process().unwrap();

    let job = store.get_sync_job(&job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);

    let catalog = store.get_catalog(&catalog.id).unwrap().unwrap();
    assert_eq!(catalog.sha.as_deref(), Some("sha-a"));
}

#[test]
fn test_process_with_empty_queue_is_a_noop() {
    let db = TempDir::new().unwrap();
    let store = test_store(&db);
    let git = FakeGit::new(db.path().join("fixture"), "sha-a");

    let syncer = Syncer::new(store, git, db.path().join("clones"));
    syncer.process().unwrap();
}

#[test]
fn test_partial_failure_isolation() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "alpha", "0.1", &manifest("Task", "alpha", "0.1"));
    write_manifest(fixture.path(), "task", "beta", "0.1", &manifest("Task", "beta", "0.1"));
    // No version label: unusable for indexing.
    write_manifest(
        fixture.path(),
        "task",
        "broken",
        "0.1",
        "kind: Task\nmetadata:\n  name: broken\nspec: {}\n",
    );

    let store = test_store(&db);
    let catalog = register_catalog(&store, None);
    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-a");

    let syncer = Syncer::new(store.clone(), git, db.path().join("clones"));
    let job = syncer.enqueue(None, &catalog.id).unwrap();
    syncer.process().unwrap();

    let job = store.get_sync_job(&job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);

    // Two of three resources survive; the broken one surfaces as a
    // critical issue, not a parse error.
    let resources = store.list_resources(&catalog.id).unwrap();
    assert_eq!(resources.len(), 2);

    let errors = store.list_catalog_errors(&catalog.id).unwrap();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| e.kind != "error"));
    assert!(errors.iter().any(|e| e.kind == "critical"));
}

#[test]
fn test_concurrent_enqueue_yields_one_live_job() {
    let db = TempDir::new().unwrap();
    let store = test_store(&db);
    let catalog = register_catalog(&store, None);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let catalog_id = catalog.id.clone();
        handles.push(std::thread::spawn(move || {
            store
                .enqueue_sync_job(&catalog_id, Some(&format!("user-{i}")))
                .unwrap()
        }));
    }

    let ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().id)
        .collect();

    assert!(ids.iter().all(|id| id == &ids[0]));

    let jobs = store.list_catalog_jobs(&catalog.id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
}

#[test]
fn test_worker_drains_queue() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "alpha", "0.1", &manifest("Task", "alpha", "0.1"));

    let store = test_store(&db);
    let now = Utc::now();
    let mut catalogs = Vec::new();
    for name in ["one", "two", "three"] {
        let catalog = Catalog {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            org: "tektoncd".to_string(),
            url: "https://github.com/tektoncd/catalog".to_string(),
            revision: "main".to_string(),
            context_dir: None,
            sha: None,
            created_at: now,
            updated_at: now,
        };
        store.create_catalog(&catalog).unwrap();
        catalogs.push(catalog);
    }

    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-a");
    let syncer = Syncer::new(store.clone(), git, db.path().join("clones"));
    syncer.run().unwrap();
    // A second run is a no-op.
    syncer.run().unwrap();

    let jobs: Vec<_> = catalogs
        .iter()
        .map(|c| syncer.enqueue(None, &c.id).unwrap())
        .collect();

    wait_until("all jobs to finish", || {
        jobs.iter().all(|job| {
            store
                .get_sync_job(&job.id)
                .unwrap()
                .map(|j| j.status.is_terminal())
                .unwrap_or(false)
        })
    });

    syncer.stop();

    for job in &jobs {
        let job = store.get_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
    }
}

#[test]
fn test_run_recovers_orphaned_running_job() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "alpha", "0.1", &manifest("Task", "alpha", "0.1"));

    let store = test_store(&db);
    let catalog = register_catalog(&store, None);

    // Simulate a crash mid-cycle: the job is stuck in running.
    let job = store.enqueue_sync_job(&catalog.id, None).unwrap();
    store.set_job_status(&job.id, JobStatus::Running).unwrap();

    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-a");
    let syncer = Syncer::new(store.clone(), git, db.path().join("clones"));
    syncer.run().unwrap();

    // The orphaned job is requeued and then processed; without the
    // requeue it would sit in running forever.
    wait_until("orphaned job to finish", || {
        store
            .get_sync_job(&job.id)
            .unwrap()
            .map(|j| j.status == JobStatus::Done)
            .unwrap_or(false)
    });

    syncer.stop();
}

#[test]
fn test_new_head_picks_up_new_versions() {
    let db = TempDir::new().unwrap();
    let fixture = TempDir::new().unwrap();
    write_manifest(fixture.path(), "task", "alpha", "0.1", &manifest("Task", "alpha", "0.1"));

    let store = test_store(&db);
    let catalog = register_catalog(&store, None);
    let git = FakeGit::new(fixture.path().to_path_buf(), "sha-a");

    let syncer = Syncer::new(store.clone(), git.clone(), db.path().join("clones"));
    syncer.enqueue(None, &catalog.id).unwrap();
    syncer.process().unwrap();

    // The remote gains a version and moves to a new head.
    write_manifest(fixture.path(), "task", "alpha", "0.2", &manifest("Task", "alpha", "0.2"));
    git.set_head("sha-b");

    syncer.enqueue(None, &catalog.id).unwrap();
    syncer.process().unwrap();

    let catalog = store.get_catalog(&catalog.id).unwrap().unwrap();
    assert_eq!(catalog.sha.as_deref(), Some("sha-b"));

    let resource = store
        .get_resource(&catalog.id, "alpha", ResourceKind::Task)
        .unwrap()
        .unwrap();
    let versions = store.list_resource_versions(&resource.id).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].version, "0.2");
}
