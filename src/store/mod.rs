mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::parser::{ParseReport, ParsedResource};
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Catalog operations
    fn create_catalog(&self, catalog: &Catalog) -> Result<()>;
    fn get_catalog(&self, id: &str) -> Result<Option<Catalog>>;
    fn get_catalog_by_name(&self, name: &str) -> Result<Option<Catalog>>;
    fn list_catalogs(&self) -> Result<Vec<Catalog>>;
    fn update_catalog(&self, catalog: &Catalog) -> Result<()>;
    fn delete_catalog(&self, id: &str) -> Result<bool>;

    // Sync job operations. Enqueue returns the pre-existing live job when
    // one is queued or running, guaranteeing at most one per catalog.
    fn enqueue_sync_job(&self, catalog_id: &str, user_id: Option<&str>) -> Result<SyncJob>;
    fn next_queued_job(&self) -> Result<Option<SyncJob>>;
    fn get_sync_job(&self, id: &str) -> Result<Option<SyncJob>>;
    fn set_job_status(&self, id: &str, status: JobStatus) -> Result<()>;
    fn requeue_running_jobs(&self) -> Result<usize>;
    fn count_queued_jobs(&self) -> Result<i64>;
    fn list_catalog_jobs(&self, catalog_id: &str) -> Result<Vec<SyncJob>>;

    // Read operations for downstream consumers
    fn get_resource(
        &self,
        catalog_id: &str,
        name: &str,
        kind: ResourceKind,
    ) -> Result<Option<Resource>>;
    fn list_resources(&self, catalog_id: &str) -> Result<Vec<Resource>>;
    fn list_resource_versions(&self, resource_id: &str) -> Result<Vec<ResourceVersion>>;
    fn list_resource_tags(&self, resource_id: &str) -> Result<Vec<Tag>>;
    fn list_resource_categories(&self, resource_id: &str) -> Result<Vec<Category>>;
    fn list_version_platforms(&self, version_id: &str) -> Result<Vec<Platform>>;
    fn list_catalog_errors(&self, catalog_id: &str) -> Result<Vec<CatalogError>>;

    /// Applies one parse result to the database in a single transaction:
    /// upserts resources/versions/associations, replaces the catalog's
    /// error rows, and persists the new head sha. Rolls back atomically,
    /// so readers never observe a half-updated catalog.
    fn reconcile_catalog(
        &self,
        catalog_id: &str,
        sha: &str,
        resources: &[ParsedResource],
        report: &ParseReport,
    ) -> Result<()>;
}
