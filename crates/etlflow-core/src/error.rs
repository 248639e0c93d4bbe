use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("The file {0} does not exist")]
    TemplateNotFound(PathBuf),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Cannot read yaml config file {source_name}, check formatting.\nreason: {message}")]
    InvalidYaml {
        source_name: String,
        message: String,
    },

    #[error("Unresolved placeholder(s) in {source_name}: {tokens}")]
    UnresolvedPlaceholder { source_name: String, tokens: String },

    #[error("Cannot fetch remote template {url}\nreason: {message}")]
    RemoteFetch { url: String, message: String },

    #[error("Invalid template location: {0}")]
    InvalidLocation(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Resource '{from}' depends on unknown resource '{to}'")]
    UnknownDependency { from: String, to: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Regex compile error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
