pub const SCHEMA: &str = r#"
-- Configured git-backed catalogs; sha is the head of the last successful sync
CREATE TABLE IF NOT EXISTS catalogs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    org TEXT NOT NULL,
    url TEXT NOT NULL,
    revision TEXT NOT NULL,
    context_dir TEXT,
    sha TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Append-only ledger of catalog refresh requests
CREATE TABLE IF NOT EXISTS sync_jobs (
    id TEXT PRIMARY KEY,
    catalog_id TEXT NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
    user_id TEXT,
    status TEXT NOT NULL DEFAULT 'queued',  -- queued | running | done | error
    created_at TEXT DEFAULT (datetime('now'))
);

-- Indexed Task/Pipeline definitions
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    catalog_id TEXT NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,

    -- Owned by the rating subsystem; untouched by resync
    rating REAL NOT NULL DEFAULT 0,

    UNIQUE(catalog_id, name, kind)
);

CREATE TABLE IF NOT EXISTS resource_versions (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    display_name TEXT,
    description TEXT,
    min_pipelines_version TEXT,
    url TEXT,
    deprecated INTEGER NOT NULL DEFAULT 0,
    modified_at TEXT,

    UNIQUE(resource_id, version)
);

-- Tags, categories and platforms are global vocabularies
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS platforms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS resource_tags (
    resource_id TEXT REFERENCES resources(id) ON DELETE CASCADE,
    tag_id TEXT REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (resource_id, tag_id)
);

CREATE TABLE IF NOT EXISTS resource_categories (
    resource_id TEXT REFERENCES resources(id) ON DELETE CASCADE,
    category_id TEXT REFERENCES categories(id) ON DELETE CASCADE,
    PRIMARY KEY (resource_id, category_id)
);

CREATE TABLE IF NOT EXISTS version_platforms (
    version_id TEXT REFERENCES resource_versions(id) ON DELETE CASCADE,
    platform_id TEXT REFERENCES platforms(id) ON DELETE CASCADE,
    PRIMARY KEY (version_id, platform_id)
);

-- Current parse problems per catalog; fully replaced on each sync
CREATE TABLE IF NOT EXISTS catalog_errors (
    id TEXT PRIMARY KEY,
    catalog_id TEXT NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,  -- error | critical | warning | info
    detail TEXT NOT NULL
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_sync_jobs_catalog ON sync_jobs(catalog_id);
CREATE INDEX IF NOT EXISTS idx_sync_jobs_status ON sync_jobs(status);
CREATE INDEX IF NOT EXISTS idx_resources_catalog ON resources(catalog_id);
CREATE INDEX IF NOT EXISTS idx_resource_versions_resource ON resource_versions(resource_id);
CREATE INDEX IF NOT EXISTS idx_catalog_errors_catalog ON catalog_errors(catalog_id);
"#;
