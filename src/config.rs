use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Workspace for catalog checkouts, sharded per catalog name. The
    /// worker is the only writer; syncs run one at a time.
    pub clone_dir: PathBuf,
    pub retry_delay: Duration,
}

impl Config {
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("hubsync.db")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            clone_dir: PathBuf::from("./data/catalogs"),
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// One `[[catalog]]` entry in the catalogs file:
///
/// ```toml
/// [[catalog]]
/// name = "tekton"
/// org = "tektoncd"
/// url = "https://github.com/tektoncd/catalog"
/// revision = "main"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub org: String,
    pub url: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    pub context_dir: Option<String>,
}

fn default_revision() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
struct CatalogsFile {
    #[serde(default, rename = "catalog")]
    catalogs: Vec<CatalogEntry>,
}

pub fn load_catalogs(path: &Path) -> Result<Vec<CatalogEntry>> {
    let raw = std::fs::read_to_string(path)?;
    let file: CatalogsFile = toml::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

    if file.catalogs.is_empty() {
        return Err(Error::Config(format!(
            "{}: no catalogs defined",
            path.display()
        )));
    }

    Ok(file.catalogs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_catalogs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogs.toml");
        std::fs::write(
            &path,
            r#"
[[catalog]]
name = "tekton"
org = "tektoncd"
url = "https://github.com/tektoncd/catalog"

[[catalog]]
name = "internal"
org = "acme"
url = "git@github.com:acme/catalog.git"
revision = "release"
context_dir = "hub"
"#,
        )
        .unwrap();

        let catalogs = load_catalogs(&path).unwrap();
        assert_eq!(catalogs.len(), 2);
        assert_eq!(catalogs[0].revision, "main");
        assert_eq!(catalogs[1].revision, "release");
        assert_eq!(catalogs[1].context_dir.as_deref(), Some("hub"));
    }

    #[test]
    fn test_load_catalogs_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogs.toml");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(load_catalogs(&path), Err(Error::Config(_))));
    }
}
