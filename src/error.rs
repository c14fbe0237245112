use thiserror::Error;

use crate::git::GitError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(#[from] GitError),
}

pub type Result<T> = std::result::Result<T, Error>;
