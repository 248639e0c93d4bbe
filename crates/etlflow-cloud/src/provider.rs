//! Provisioning engine trait
//!
//! The engine owns resource creation, diffing and rollback. etlflow hands
//! it a synthesized template and reads the outputs back.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Engine name, e.g. "cloudformation"
    fn name(&self) -> &str;

    /// Check the engine is reachable with valid credentials
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Create or update a stack and wait for it to settle
    async fn deploy(&self, deployment: &StackDeployment) -> Result<()>;

    /// Outputs of a deployed stack, keyed by output name
    async fn outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>>;

    /// Delete a stack and wait until it is gone
    async fn destroy(&self, stack_name: &str) -> Result<()>;

    /// Upload a local directory under `prefix` in `bucket`, creating the bucket if needed
    async fn upload_assets(&self, dir: &Path, bucket: &str, prefix: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,

    pub account: Option<String>,

    /// Caller ARN when authenticated
    pub principal: Option<String>,

    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account: Some(account.into()),
            principal: Some(principal.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account: None,
            principal: None,
            error: Some(error.into()),
        }
    }
}

/// Everything the engine needs for one stack deployment
#[derive(Debug, Clone)]
pub struct StackDeployment {
    pub stack_name: String,

    /// Synthesized template on disk
    pub template_path: PathBuf,

    pub parameters: BTreeMap<String, String>,

    pub tags: BTreeMap<String, String>,

    /// Bucket for templates too large to pass inline
    pub artifact_bucket: Option<String>,
}

impl StackDeployment {
    pub fn new(stack_name: impl Into<String>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            stack_name: stack_name.into(),
            template_path: template_path.into(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifact_bucket: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: &BTreeMap<String, String>) -> Self {
        self.tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_artifact_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.artifact_bucket = Some(bucket.into());
        self
    }
}
