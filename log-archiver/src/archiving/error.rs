//! Archiving error types

use crate::db::repository::RepoError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Archive or working directory unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serializing or finalizing an archive file failed
    #[error("Archive write error ({path}): {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive container error ({path}): {source}")]
    Container {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Database error: {0}")]
    Database(#[from] RepoError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hash chain error: {0}")]
    HashChain(String),
}

impl ArchiveError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Write {
            path: path.into(),
            source,
        }
    }

    pub fn container(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        ArchiveError::Container {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for ArchiveError {
    fn from(err: sqlx::Error) -> Self {
        ArchiveError::Database(RepoError::from(err))
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
