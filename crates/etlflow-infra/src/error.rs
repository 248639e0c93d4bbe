use etlflow_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfraError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid IAM statement in {source_name}: {message}")]
    InvalidStatement {
        source_name: String,
        message: String,
    },

    #[error("Invalid Kubernetes manifest in {source_name}: {message}")]
    InvalidManifest {
        source_name: String,
        message: String,
    },

    #[error("Asset directory not found: {0}")]
    AssetDirNotFound(PathBuf),

    #[error("Asset scan failed: {0}")]
    AssetScan(String),

    #[error("No origin for the {0} distribution: set it in the cdn config or deploy the main stack first")]
    MissingOrigin(String),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, InfraError>;
