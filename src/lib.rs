//! # Hubsync
//!
//! The catalog synchronization engine behind a Tekton resource hub. It
//! pulls git-backed catalogs, parses the Task and Pipeline manifests
//! they contain, and reconciles the results into a resource database
//! that a separate read API serves to browsers.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::path::PathBuf;
//! use hubsync::git::Git2Client;
//! use hubsync::store::{SqliteStore, Store};
//! use hubsync::sync::Syncer;
//!
//! let store = Arc::new(SqliteStore::new("./data/hubsync.db").unwrap());
//! store.initialize().unwrap();
//!
//! let syncer = Syncer::new(store, Arc::new(Git2Client), PathBuf::from("./data/catalogs"));
//! syncer.run().unwrap();
//! syncer.enqueue(None, "catalog-id").unwrap();
//! ```

pub mod config;
pub mod error;
pub mod git;
pub mod parser;
pub mod store;
pub mod sync;
pub mod types;
