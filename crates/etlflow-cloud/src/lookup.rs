//! Bounded wait for a value on a live Kubernetes object
//!
//! Used for load balancer hostnames, which only appear once the ingress
//! controller has reconciled the ingress.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// A field on a Kubernetes object, addressed by JSONPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub object_type: String,
    pub name: String,
    pub namespace: String,
    pub json_path: String,
}

impl ObjectRef {
    pub fn new(object_type: &str, name: &str, namespace: &str, json_path: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            json_path: json_path.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} in {}", self.object_type, self.name, self.namespace)
    }
}

#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Current value, or `None` while the object or field does not exist
    async fn read(&self, object: &ObjectRef) -> Result<Option<String>>;
}

/// Poll `object` every `interval` until a non-empty value appears.
///
/// Fails with [`CloudError::Timeout`] once `timeout` has passed. Read errors
/// other than "not there yet" end the wait immediately.
#[instrument(skip(reader, object), fields(object = %object))]
pub async fn wait_for_object_value(
    reader: &dyn ObjectReader,
    object: &ObjectRef,
    timeout: Duration,
    interval: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, poll(reader, object, interval)).await {
        Ok(result) => result,
        Err(_) => Err(CloudError::Timeout {
            what: object.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

async fn poll(reader: &dyn ObjectReader, object: &ObjectRef, interval: Duration) -> Result<String> {
    let mut ticker = tokio::time::interval(interval);
    let mut attempts = 0u32;
    loop {
        ticker.tick().await;
        attempts += 1;
        if let Some(value) = reader.read(object).await?
            && !value.trim().is_empty()
        {
            debug!(attempts, "Object value available");
            return Ok(value);
        }
    }
}
