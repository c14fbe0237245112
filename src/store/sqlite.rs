use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::git::manifest_url;
use crate::parser::{ParseReport, ParsedResource, ParsedVersion};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_status(s: &str) -> JobStatus {
    s.parse().unwrap_or_else(|e| {
        tracing::error!("Invalid job status in database: {}", e);
        JobStatus::Error
    })
}

fn parse_kind(s: &str) -> ResourceKind {
    s.parse().unwrap_or_else(|e| {
        tracing::error!("Invalid resource kind in database: {}", e);
        ResourceKind::Task
    })
}

fn catalog_from_row(row: &Row<'_>) -> rusqlite::Result<Catalog> {
    Ok(Catalog {
        id: row.get(0)?,
        name: row.get(1)?,
        org: row.get(2)?,
        url: row.get(3)?,
        revision: row.get(4)?,
        context_dir: row.get(5)?,
        sha: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<SyncJob> {
    Ok(SyncJob {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        user_id: row.get(2)?,
        status: parse_status(&row.get::<_, String>(3)?),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        name: row.get(2)?,
        kind: parse_kind(&row.get::<_, String>(3)?),
        rating: row.get(4)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceVersion> {
    Ok(ResourceVersion {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        version: row.get(2)?,
        display_name: row.get(3)?,
        description: row.get(4)?,
        min_pipelines_version: row.get(5)?,
        url: row.get(6)?,
        deprecated: row.get(7)?,
        modified_at: row.get::<_, Option<String>>(8)?.map(|s| parse_datetime(&s)),
    })
}

const CATALOG_COLUMNS: &str =
    "id, name, org, url, revision, context_dir, sha, created_at, updated_at";
const JOB_COLUMNS: &str = "id, catalog_id, user_id, status, created_at";
const VERSION_COLUMNS: &str = "id, resource_id, version, display_name, description, min_pipelines_version, url, deprecated, modified_at";

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // Catalog operations

    fn create_catalog(&self, catalog: &Catalog) -> Result<()> {
        self.conn().execute(
            "INSERT INTO catalogs (id, name, org, url, revision, context_dir, sha, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                catalog.id,
                catalog.name,
                catalog.org,
                catalog.url,
                catalog.revision,
                catalog.context_dir,
                catalog.sha,
                format_datetime(&catalog.created_at),
                format_datetime(&catalog.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_catalog(&self, id: &str) -> Result<Option<Catalog>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE id = ?1"),
            params![id],
            catalog_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_catalog_by_name(&self, name: &str) -> Result<Option<Catalog>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE name = ?1"),
            params![name],
            catalog_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_catalogs(&self) -> Result<Vec<Catalog>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {CATALOG_COLUMNS} FROM catalogs ORDER BY name"))?;

        let rows = stmt.query_map([], catalog_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_catalog(&self, catalog: &Catalog) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE catalogs SET name = ?1, org = ?2, url = ?3, revision = ?4, context_dir = ?5, sha = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                catalog.name,
                catalog.org,
                catalog.url,
                catalog.revision,
                catalog.context_dir,
                catalog.sha,
                format_datetime(&Utc::now()),
                catalog.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_catalog(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM catalogs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Sync job operations

    fn enqueue_sync_job(&self, catalog_id: &str, user_id: Option<&str>) -> Result<SyncJob> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // At most one live job per catalog: return the existing one if a
        // queued or running row is present.
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM sync_jobs
                     WHERE catalog_id = ?1 AND status IN ('queued', 'running')
                     ORDER BY created_at LIMIT 1"
                ),
                params![catalog_id],
                job_from_row,
            )
            .optional()?;

        if let Some(job) = existing {
            tx.commit()?;
            return Ok(job);
        }

        let job = SyncJob {
            id: Uuid::new_v4().to_string(),
            catalog_id: catalog_id.to_string(),
            user_id: user_id.map(str::to_string),
            status: JobStatus::Queued,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO sync_jobs (id, catalog_id, user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.id,
                job.catalog_id,
                job.user_id,
                job.status.as_str(),
                format_datetime(&job.created_at),
            ],
        )?;

        tx.commit()?;
        Ok(job)
    }

    fn next_queued_job(&self) -> Result<Option<SyncJob>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs
                 WHERE status = 'queued' ORDER BY created_at, id LIMIT 1"
            ),
            [],
            job_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_sync_job(&self, id: &str) -> Result<Option<SyncJob>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn set_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE sync_jobs SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn requeue_running_jobs(&self) -> Result<usize> {
        let rows = self.conn().execute(
            "UPDATE sync_jobs SET status = 'queued' WHERE status = 'running'",
            [],
        )?;
        Ok(rows)
    }

    fn count_queued_jobs(&self) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_jobs WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list_catalog_jobs(&self, catalog_id: &str) -> Result<Vec<SyncJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs WHERE catalog_id = ?1 ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map(params![catalog_id], job_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Read operations

    fn get_resource(
        &self,
        catalog_id: &str,
        name: &str,
        kind: ResourceKind,
    ) -> Result<Option<Resource>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, catalog_id, name, kind, rating FROM resources
             WHERE catalog_id = ?1 AND name = ?2 AND kind = ?3",
            params![catalog_id, name, kind.as_str()],
            resource_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_resources(&self, catalog_id: &str) -> Result<Vec<Resource>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, catalog_id, name, kind, rating FROM resources
             WHERE catalog_id = ?1 ORDER BY kind, name",
        )?;

        let rows = stmt.query_map(params![catalog_id], resource_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_resource_versions(&self, resource_id: &str) -> Result<Vec<ResourceVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM resource_versions WHERE resource_id = ?1 ORDER BY version"
        ))?;

        let rows = stmt.query_map(params![resource_id], version_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_resource_tags(&self, resource_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name FROM tags t
             JOIN resource_tags rt ON t.id = rt.tag_id
             WHERE rt.resource_id = ?1 ORDER BY t.name",
        )?;

        let rows = stmt.query_map(params![resource_id], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_resource_categories(&self, resource_id: &str) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name FROM categories c
             JOIN resource_categories rc ON c.id = rc.category_id
             WHERE rc.resource_id = ?1 ORDER BY c.name",
        )?;

        let rows = stmt.query_map(params![resource_id], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_version_platforms(&self, version_id: &str) -> Result<Vec<Platform>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name FROM platforms p
             JOIN version_platforms vp ON p.id = vp.platform_id
             WHERE vp.version_id = ?1 ORDER BY p.name",
        )?;

        let rows = stmt.query_map(params![version_id], |row| {
            Ok(Platform {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_catalog_errors(&self, catalog_id: &str) -> Result<Vec<CatalogError>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, catalog_id, kind, detail FROM catalog_errors
             WHERE catalog_id = ?1 ORDER BY kind, detail",
        )?;

        let rows = stmt.query_map(params![catalog_id], |row| {
            Ok(CatalogError {
                id: row.get(0)?,
                catalog_id: row.get(1)?,
                kind: row.get(2)?,
                detail: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Reconciliation

    fn reconcile_catalog(
        &self,
        catalog_id: &str,
        sha: &str,
        resources: &[ParsedResource],
        report: &ParseReport,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let repo_url: String = tx
            .query_row(
                "SELECT url FROM catalogs WHERE id = ?1",
                params![catalog_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        for resource in resources {
            if resource.versions.is_empty() {
                tracing::warn!(
                    name = %resource.name,
                    kind = %resource.kind,
                    "resource has no versions, skipping"
                );
                continue;
            }

            let resource_id = upsert_resource(&tx, catalog_id, resource)?;

            for tag in &resource.tags {
                let tag_id = find_or_create_named(&tx, "tags", tag)?;
                tx.execute(
                    "INSERT OR IGNORE INTO resource_tags (resource_id, tag_id) VALUES (?1, ?2)",
                    params![resource_id, tag_id],
                )?;
            }

            for category in &resource.categories {
                let category_id = find_or_create_named(&tx, "categories", category)?;
                tx.execute(
                    "INSERT OR IGNORE INTO resource_categories (resource_id, category_id) VALUES (?1, ?2)",
                    params![resource_id, category_id],
                )?;
            }

            for version in &resource.versions {
                let version_id = upsert_version(&tx, &resource_id, version, &repo_url, sha)?;

                for platform in &version.platforms {
                    let platform_id = find_or_create_named(&tx, "platforms", platform)?;
                    tx.execute(
                        "INSERT OR IGNORE INTO version_platforms (version_id, platform_id) VALUES (?1, ?2)",
                        params![version_id, platform_id],
                    )?;
                }
            }
        }

        // The error table reflects current issues, not history: replace
        // the whole set for this catalog.
        tx.execute(
            "DELETE FROM catalog_errors WHERE catalog_id = ?1",
            params![catalog_id],
        )?;

        for error in &report.errors {
            insert_catalog_error(&tx, catalog_id, "error", error)?;
        }
        for issue in &report.issues {
            insert_catalog_error(&tx, catalog_id, issue.severity.as_str(), &issue.message)?;
        }

        tx.execute(
            "UPDATE catalogs SET sha = ?1, updated_at = ?2 WHERE id = ?3",
            params![sha, format_datetime(&Utc::now()), catalog_id],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Upserts by natural key and returns the surviving row id, so resyncs
/// never duplicate a resource or orphan its ratings.
fn upsert_resource(
    tx: &Transaction<'_>,
    catalog_id: &str,
    resource: &ParsedResource,
) -> Result<String> {
    tx.execute(
        "INSERT INTO resources (id, catalog_id, name, kind) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (catalog_id, name, kind) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            catalog_id,
            resource.name,
            resource.kind.as_str(),
        ],
    )?;

    let id = tx.query_row(
        "SELECT id FROM resources WHERE catalog_id = ?1 AND name = ?2 AND kind = ?3",
        params![catalog_id, resource.name, resource.kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Upsert-by-overwrite: the row id (and any foreign keys pointing at it)
/// survives, while the indexed fields converge to the parser's latest view.
fn upsert_version(
    tx: &Transaction<'_>,
    resource_id: &str,
    version: &ParsedVersion,
    repo_url: &str,
    sha: &str,
) -> Result<String> {
    let url = manifest_url(repo_url, sha, &version.path.to_string_lossy());

    tx.execute(
        "INSERT INTO resource_versions
             (id, resource_id, version, display_name, description, min_pipelines_version, url, deprecated, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (resource_id, version) DO UPDATE SET
            display_name = excluded.display_name,
            description = excluded.description,
            min_pipelines_version = excluded.min_pipelines_version,
            url = excluded.url,
            deprecated = excluded.deprecated,
            modified_at = excluded.modified_at",
        params![
            Uuid::new_v4().to_string(),
            resource_id,
            version.version,
            version.display_name,
            version.description,
            version.min_pipelines_version,
            url,
            version.deprecated,
            version.modified_at.map(|t| format_datetime(&t)),
        ],
    )?;

    let id = tx.query_row(
        "SELECT id FROM resource_versions WHERE resource_id = ?1 AND version = ?2",
        params![resource_id, version.version],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn find_or_create_named(tx: &Transaction<'_>, table: &str, name: &str) -> Result<String> {
    tx.execute(
        &format!("INSERT OR IGNORE INTO {table} (id, name) VALUES (?1, ?2)"),
        params![Uuid::new_v4().to_string(), name],
    )?;

    let id = tx.query_row(
        &format!("SELECT id FROM {table} WHERE name = ?1"),
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_catalog_error(
    tx: &Transaction<'_>,
    catalog_id: &str,
    kind: &str,
    detail: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO catalog_errors (id, catalog_id, kind, detail) VALUES (?1, ?2, ?3, ?4)",
        params![Uuid::new_v4().to_string(), catalog_id, kind, detail],
    )?;
    Ok(())
}
